//! REST client for the commerce backend's cart, catalog media and checkout endpoints.
//!
//! Customer carts are addressed as `carts/mine` with a bearer token; guest carts
//! as `guest-carts/{cartId}` without authentication.

use std::time::Instant;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use storefront_core::cart::{
    Address, CartApi, CartLineItem, CartRoute, CartSnapshot, NewCartItem, OrderPayload,
    ShippingMethod,
};
use urlencoding::encode;

use crate::config::ClientConfig;
use crate::error::{CommerceApiError, Result};
use crate::types::*;

const MAX_LOG_BODY_CHARS: usize = 512;

/// Client for the commerce backend REST API.
#[derive(Debug, Clone)]
pub struct CommerceClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl CommerceClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[CommerceApi] Response error ({}): {}", status, preview);
    }

    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create headers for an API request, with a bearer token when given.
    fn headers(&self, token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = token {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| CommerceApiError::auth("Invalid access token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        Ok(headers)
    }

    fn route_headers(&self, route: &CartRoute) -> Result<HeaderMap> {
        match route {
            CartRoute::Customer { token } => self.headers(Some(token)),
            CartRoute::Guest { .. } => self.headers(None),
        }
    }

    /// Path of the cart resource, relative to the REST root.
    fn cart_path(route: &CartRoute) -> String {
        match route {
            CartRoute::Customer { .. } => "carts/mine".to_string(),
            CartRoute::Guest { cart_id } => format!("guest-carts/{}", encode(cart_id)),
        }
    }

    fn request(&self, method: Method, path: &str, headers: HeaderMap) -> RequestBuilder {
        let url = format!("{}/{}", self.config.rest_root(), path);
        self.client.request(method, url).headers(headers)
    }

    /// Execute a request, log its timing, and parse the JSON answer.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let request = request.build()?;
        let method = request.method().clone();
        let path = request.url().path().to_string();

        let started = Instant::now();
        let response = self.client.execute(request).await;
        let elapsed_ms = started.elapsed().as_millis();

        match response {
            Ok(response) => {
                debug!(
                    "[CommerceApi] {} {} -> {} ({} ms)",
                    method,
                    path,
                    response.status().as_u16(),
                    elapsed_ms
                );
                Self::parse_response(response).await
            }
            Err(err) => {
                debug!(
                    "[CommerceApi] {} {} failed after {} ms: {}",
                    method, path, elapsed_ms, err
                );
                Err(err.into())
            }
        }
    }

    /// Parse a JSON response body.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(CommerceApiError::Api {
                    status: status.as_u16(),
                    parameters: error.parameter_pairs(),
                    message: error.message,
                });
            }
            let message = if body.trim().is_empty() {
                format!("Request failed with status {}", status.as_u16())
            } else {
                format!("Request failed: {}", body)
            };
            return Err(CommerceApiError::api(status.as_u16(), message));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "[CommerceApi] Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            CommerceApiError::Json(e)
        })
    }

    fn media_url(&self, file: &str) -> String {
        format!(
            "{}/{}",
            self.config.media_base_url,
            file.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl CartApi for CommerceClient {
    /// POST /guest-carts
    async fn create_guest_cart(&self) -> storefront_core::Result<String> {
        let request = self.request(Method::POST, "guest-carts", self.headers(None)?);
        let ScalarId(cart_id) = self.send(request).await?;
        Ok(cart_id)
    }

    /// POST /carts/mine
    async fn create_customer_cart(&self, token: &str) -> storefront_core::Result<String> {
        let request = self.request(Method::POST, "carts/mine", self.headers(Some(token))?);
        let ScalarId(cart_id) = self.send(request).await?;
        Ok(cart_id)
    }

    /// GET /carts/mine | /guest-carts/{cartId}
    async fn get_cart(&self, route: &CartRoute) -> storefront_core::Result<CartSnapshot> {
        let request = self.request(
            Method::GET,
            &Self::cart_path(route),
            self.route_headers(route)?,
        );
        let cart: WireCart = self.send(request).await?;
        Ok(cart.into())
    }

    /// POST {cart}/items
    async fn add_item(
        &self,
        route: &CartRoute,
        item: &NewCartItem,
    ) -> storefront_core::Result<CartLineItem> {
        let path = format!("{}/items", Self::cart_path(route));
        debug!("[CommerceApi] Adding {} x{} to {} cart", item.sku, item.qty, route.label());

        let request = self
            .request(Method::POST, &path, self.route_headers(route)?)
            .json(&AddItemBody::from(item));
        let line: WireCartItem = self.send(request).await?;
        Ok(line.into())
    }

    /// PUT {cart}/items/{itemId}
    async fn update_item(
        &self,
        route: &CartRoute,
        item_id: &str,
        qty: u32,
        quote_id: Option<&str>,
    ) -> storefront_core::Result<CartLineItem> {
        let path = format!("{}/items/{}", Self::cart_path(route), encode(item_id));
        let body = UpdateItemBody {
            cart_item: UpdateItemPayload {
                item_id,
                qty,
                quote_id,
            },
        };

        let request = self
            .request(Method::PUT, &path, self.route_headers(route)?)
            .json(&body);
        let line: WireCartItem = self.send(request).await?;
        Ok(line.into())
    }

    /// DELETE {cart}/items/{itemId}
    async fn remove_item(&self, route: &CartRoute, item_id: &str) -> storefront_core::Result<()> {
        let path = format!("{}/items/{}", Self::cart_path(route), encode(item_id));
        let request = self.request(Method::DELETE, &path, self.route_headers(route)?);
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }

    /// GET /products/{sku}/media
    async fn product_image(&self, sku: &str) -> storefront_core::Result<Option<String>> {
        let path = format!("products/{}/media", encode(sku));
        let request = self.request(Method::GET, &path, self.headers(None)?);
        let entries: Vec<WireMediaEntry> = self.send(request).await?;
        Ok(primary_media_file(&entries).map(|file| self.media_url(file)))
    }

    /// PUT /guest-carts/{cartId}
    async fn assign_guest_cart(
        &self,
        token: &str,
        guest_cart_id: &str,
        customer_id: i64,
    ) -> storefront_core::Result<()> {
        let path = format!("guest-carts/{}", encode(guest_cart_id));
        let request = self
            .request(Method::PUT, &path, self.headers(Some(token))?)
            .json(&AssignCartBody {
                customer_id,
                store_id: self.config.store_id,
            });
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }

    /// PUT {cart}/coupons/{code}
    async fn apply_coupon(&self, route: &CartRoute, code: &str) -> storefront_core::Result<()> {
        let path = format!("{}/coupons/{}", Self::cart_path(route), encode(code));
        let request = self.request(Method::PUT, &path, self.route_headers(route)?);
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }

    /// DELETE {cart}/coupons
    async fn remove_coupon(&self, route: &CartRoute) -> storefront_core::Result<()> {
        let path = format!("{}/coupons", Self::cart_path(route));
        let request = self.request(Method::DELETE, &path, self.route_headers(route)?);
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }

    /// POST {cart}/estimate-shipping-methods
    async fn estimate_shipping(
        &self,
        route: &CartRoute,
        address: &Address,
    ) -> storefront_core::Result<Vec<ShippingMethod>> {
        let path = format!("{}/estimate-shipping-methods", Self::cart_path(route));
        let request = self
            .request(Method::POST, &path, self.route_headers(route)?)
            .json(&EstimateShippingBody { address });
        let methods: Vec<WireShippingMethod> = self.send(request).await?;
        Ok(methods.into_iter().map(ShippingMethod::from).collect())
    }

    /// POST {cart}/payment-information
    async fn place_order(
        &self,
        route: &CartRoute,
        payload: &OrderPayload,
    ) -> storefront_core::Result<String> {
        let path = format!("{}/payment-information", Self::cart_path(route));
        let request = self
            .request(Method::POST, &path, self.route_headers(route)?)
            .json(&PaymentInformationBody::from(payload));
        let ScalarId(order_id) = self.send(request).await?;
        Ok(order_id)
    }
}
