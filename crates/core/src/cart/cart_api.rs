//! Contract for the remote cart service.

use async_trait::async_trait;

use super::cart_model::{
    Address, CartLineItem, CartRoute, CartSnapshot, NewCartItem, OrderPayload, ShippingMethod,
};
use crate::errors::Result;

/// Remote commerce backend as seen by the synchronization engine.
///
/// Implementations map each call to a single request and normalize responses
/// into the domain models; they hold no cart state of their own.
#[async_trait]
pub trait CartApi: Send + Sync {
    /// Create an empty guest cart and return its identifier.
    async fn create_guest_cart(&self) -> Result<String>;

    /// Create (or reactivate) the customer's cart and return its identifier.
    async fn create_customer_cart(&self, token: &str) -> Result<String>;

    /// Load the cart. Line images are not resolved here.
    async fn get_cart(&self, route: &CartRoute) -> Result<CartSnapshot>;

    async fn add_item(&self, route: &CartRoute, item: &NewCartItem) -> Result<CartLineItem>;

    async fn update_item(
        &self,
        route: &CartRoute,
        item_id: &str,
        qty: u32,
        quote_id: Option<&str>,
    ) -> Result<CartLineItem>;

    async fn remove_item(&self, route: &CartRoute, item_id: &str) -> Result<()>;

    /// Resolve the display image URL for a SKU, if the product has one.
    async fn product_image(&self, sku: &str) -> Result<Option<String>>;

    /// Hand a guest cart over to an authenticated customer, in the store view
    /// the implementation is configured for.
    async fn assign_guest_cart(
        &self,
        token: &str,
        guest_cart_id: &str,
        customer_id: i64,
    ) -> Result<()>;

    async fn apply_coupon(&self, route: &CartRoute, code: &str) -> Result<()>;

    async fn remove_coupon(&self, route: &CartRoute) -> Result<()>;

    async fn estimate_shipping(
        &self,
        route: &CartRoute,
        address: &Address,
    ) -> Result<Vec<ShippingMethod>>;

    /// Place the order and return its identifier.
    async fn place_order(&self, route: &CartRoute, payload: &OrderPayload) -> Result<String>;
}
