//! Core of the storefront client: the cart synchronization engine and the
//! seams it depends on (remote cart API, local storage, event sink).

pub mod cart;
pub mod errors;
pub mod events;
pub mod session;
pub mod storage;

pub use errors::{Error, Result};
pub use session::Session;
