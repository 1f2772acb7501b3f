//! REST client for the commerce backend consumed by the cart engine.
//!
//! [`CommerceClient`] implements [`storefront_core::cart::CartApi`] against the
//! backend's `/rest/{store_code}/V1` surface.

pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use client::CommerceClient;
pub use config::ClientConfig;
pub use error::{CommerceApiError, Result};
