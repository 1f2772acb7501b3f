//! Cart domain: models, reducer state, backend contract and the synchronization engine.

mod cart_api;
mod cart_model;
mod cart_state;
mod cart_sync_config;
mod cart_sync_service;

pub use cart_api::*;
pub use cart_model::*;
pub use cart_state::*;
pub use cart_sync_config::*;
pub use cart_sync_service::*;

#[cfg(test)]
mod tests;
