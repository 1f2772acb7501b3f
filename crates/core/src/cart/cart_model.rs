//! Cart domain models shared by the engine and the backend adapter.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Prefix of synthetic `item_id`s given to lines added optimistically.
pub const PLACEHOLDER_PREFIX: &str = "temp-";

/// Build a placeholder line id from a millisecond timestamp.
pub fn placeholder_item_id(timestamp_millis: i64) -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, timestamp_millis)
}

/// One product line in a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    /// Server-assigned id, or a `temp-<millis>` placeholder until confirmed.
    pub item_id: String,
    pub sku: String,
    pub qty: u32,
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub image: Option<String>,
    /// A mutation targeting this line is in flight.
    #[serde(default)]
    pub loading: bool,
    /// Last confirmed quantity, held only while a quantity update is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_qty: Option<u32>,
}

impl CartLineItem {
    pub fn is_placeholder(&self) -> bool {
        self.item_id.starts_with(PLACEHOLDER_PREFIX)
    }
}

/// Local view of one guest or customer cart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub id: String,
    pub items: Vec<CartLineItem>,
    /// Always the sum of `items[].qty`; see [`CartSnapshot::recompute_totals`].
    pub items_qty: u32,
    pub currency: Option<String>,
    pub grand_total: Option<Decimal>,
    /// Backend fields the client passes through untouched (addresses, customer, ...).
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CartSnapshot {
    /// Saturates at `u32::MAX` instead of wrapping.
    pub fn recompute_totals(&mut self) {
        self.items_qty = self
            .items
            .iter()
            .fold(0u32, |total, item| total.saturating_add(item.qty));
    }

    pub fn item(&self, item_id: &str) -> Option<&CartLineItem> {
        self.items.iter().find(|item| item.item_id == item_id)
    }

    pub(crate) fn item_mut(&mut self, item_id: &str) -> Option<&mut CartLineItem> {
        self.items.iter_mut().find(|item| item.item_id == item_id)
    }
}

/// Caller input for adding a product to the cart.
///
/// `name`, `price` and `image` only decorate the placeholder line shown while
/// the add is in flight.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub sku: String,
    pub qty: u32,
    pub product_option: Option<serde_json::Value>,
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub image: Option<String>,
}

impl AddItemRequest {
    pub fn new(sku: impl Into<String>, qty: u32) -> Self {
        Self {
            sku: sku.into(),
            qty,
            ..Self::default()
        }
    }
}

/// Item payload sent to the backend on add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCartItem {
    pub sku: String,
    pub qty: u32,
    pub quote_id: Option<String>,
    pub product_option: Option<serde_json::Value>,
}

/// Which remote cart a call targets.
#[derive(Clone, PartialEq, Eq)]
pub enum CartRoute {
    /// The authenticated customer's implicit cart.
    Customer { token: String },
    /// A guest cart addressed by its client-held identifier.
    Guest { cart_id: String },
}

impl CartRoute {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Customer { .. } => "customer",
            Self::Guest { .. } => "guest",
        }
    }
}

impl std::fmt::Debug for CartRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer { .. } => f.write_str("Customer"),
            Self::Guest { cart_id } => f.debug_struct("Guest").field("cart_id", cart_id).finish(),
        }
    }
}

/// Postal address used for shipping estimates and billing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firstname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastname: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub street: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_id: Option<i64>,
    pub country_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub carrier_code: String,
    pub method_code: String,
    pub carrier_title: Option<String>,
    pub method_title: Option<String>,
    pub amount: Decimal,
    pub available: bool,
}

/// Checkout selections that turn the current cart into an order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderPayload {
    pub payment_method: String,
    pub billing_address: Option<Address>,
    /// Required for guest checkouts.
    pub email: Option<String>,
}
