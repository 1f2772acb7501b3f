//! Wire types for the commerce backend's REST API.
//!
//! The backend is loose about JSON types: numeric identifiers arrive as numbers
//! or strings, quantities as integers or floats. Everything is normalized here
//! before it reaches the domain models.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use storefront_core::cart::{
    Address, CartLineItem, CartSnapshot, NewCartItem, OrderPayload, ShippingMethod,
};

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseId {
    Text(String),
    Int(i64),
    Float(f64),
}

impl LooseId {
    fn into_string(self) -> String {
        match self {
            Self::Text(value) => value,
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
        }
    }
}

/// Accept a JSON string or number and keep it as a string.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    LooseId::deserialize(deserializer).map(LooseId::into_string)
}

pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<LooseId>::deserialize(deserializer)?.map(LooseId::into_string))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseQty {
    Int(u64),
    Float(f64),
    Text(String),
}

/// Quantities arrive as `2`, `2.0` or `"2"`. Fractions round, negatives clamp to zero.
pub fn quantity<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let qty = match LooseQty::deserialize(deserializer)? {
        LooseQty::Int(value) => value as f64,
        LooseQty::Float(value) => value,
        LooseQty::Text(value) => value
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid quantity '{}'", value)))?,
    };
    Ok(qty.round().clamp(0.0, u32::MAX as f64) as u32)
}

/// String id wrapper for endpoints that answer with a bare JSON scalar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ScalarId(#[serde(deserialize_with = "string_or_number")] pub String);

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WireCartItem {
    #[serde(deserialize_with = "string_or_number")]
    pub item_id: String,
    pub sku: String,
    #[serde(deserialize_with = "quantity")]
    pub qty: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub quote_id: Option<String>,
}

impl From<WireCartItem> for CartLineItem {
    fn from(item: WireCartItem) -> Self {
        Self {
            item_id: item.item_id,
            sku: item.sku,
            qty: item.qty,
            name: item.name,
            price: item.price,
            image: None,
            loading: false,
            previous_qty: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireCurrency {
    #[serde(default)]
    pub quote_currency_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireCart {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub items: Vec<WireCartItem>,
    #[serde(default)]
    pub currency: Option<WireCurrency>,
    #[serde(default)]
    pub grand_total: Option<Decimal>,
    /// Everything else (addresses, customer, totals) passes through.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<WireCart> for CartSnapshot {
    fn from(cart: WireCart) -> Self {
        let mut extra = cart.extra;
        // Derived locally.
        extra.remove("items_qty");
        extra.remove("items_count");

        let mut snapshot = Self {
            id: cart.id,
            items: cart.items.into_iter().map(CartLineItem::from).collect(),
            items_qty: 0,
            currency: cart.currency.and_then(|c| c.quote_currency_code),
            grand_total: cart.grand_total,
            extra,
        };
        snapshot.recompute_totals();
        snapshot
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMediaEntry {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Pick the `image`-typed entry, else the first one, and return its file path.
pub fn primary_media_file(entries: &[WireMediaEntry]) -> Option<&str> {
    let usable = || {
        entries
            .iter()
            .filter(|entry| !entry.disabled)
            .filter(|entry| entry.file.as_deref().is_some_and(|f| !f.is_empty()))
    };
    usable()
        .find(|entry| entry.types.iter().any(|t| t == "image"))
        .or_else(|| usable().next())
        .and_then(|entry| entry.file.as_deref())
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireShippingMethod {
    pub carrier_code: String,
    pub method_code: String,
    #[serde(default)]
    pub carrier_title: Option<String>,
    #[serde(default)]
    pub method_title: Option<String>,
    #[serde(default)]
    pub amount: Decimal,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl From<WireShippingMethod> for ShippingMethod {
    fn from(method: WireShippingMethod) -> Self {
        Self {
            carrier_code: method.carrier_code,
            method_code: method.method_code,
            carrier_title: method.carrier_title,
            method_title: method.method_title,
            amount: method.amount,
            available: method.available,
        }
    }
}

/// Backend error body. `parameters` is either a name→value object or a
/// positional array addressed as `%1`, `%2`, ...
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub message: String,
    #[serde(default)]
    pub parameters: Option<Value>,
}

impl ApiErrorResponse {
    pub fn parameter_pairs(&self) -> Vec<(String, String)> {
        match &self.parameters {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, value)| (name.clone(), scalar_text(value)))
                .collect(),
            Some(Value::Array(values)) => values
                .iter()
                .enumerate()
                .map(|(index, value)| ((index + 1).to_string(), scalar_text(value)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AddItemBody<'a> {
    #[serde(rename = "cartItem")]
    pub cart_item: AddItemPayload<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddItemPayload<'a> {
    pub sku: &'a str,
    pub qty: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_option: Option<&'a Value>,
}

impl<'a> From<&'a NewCartItem> for AddItemBody<'a> {
    fn from(item: &'a NewCartItem) -> Self {
        Self {
            cart_item: AddItemPayload {
                sku: &item.sku,
                qty: item.qty,
                quote_id: item.quote_id.as_deref(),
                product_option: item.product_option.as_ref(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateItemBody<'a> {
    #[serde(rename = "cartItem")]
    pub cart_item: UpdateItemPayload<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateItemPayload<'a> {
    pub item_id: &'a str,
    pub qty: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignCartBody {
    pub customer_id: i64,
    pub store_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimateShippingBody<'a> {
    pub address: &'a Address,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentMethodCode<'a> {
    pub method: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentInformationBody<'a> {
    #[serde(rename = "paymentMethod")]
    pub payment_method: PaymentMethodCode<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<&'a Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<&'a str>,
}

impl<'a> From<&'a OrderPayload> for PaymentInformationBody<'a> {
    fn from(payload: &'a OrderPayload) -> Self {
        Self {
            payment_method: PaymentMethodCode {
                method: &payload.payment_method,
            },
            billing_address: payload.billing_address.as_ref(),
            email: payload.email.as_deref(),
        }
    }
}
