//! Engine tuning knobs.

use std::time::Duration;

/// Default trailing debounce applied to quantity updates of one line.
pub const DEFAULT_UPDATE_DEBOUNCE: Duration = Duration::from_millis(400);

/// Local store key holding the guest cart identifier.
pub const DEFAULT_GUEST_CART_KEY: &str = "guest_cart_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSyncConfig {
    /// Quiet window before a quantity update reaches the network. Zero disables.
    pub update_debounce: Duration,
    pub guest_cart_key: String,
}

impl Default for CartSyncConfig {
    fn default() -> Self {
        Self {
            update_debounce: DEFAULT_UPDATE_DEBOUNCE,
            guest_cart_key: DEFAULT_GUEST_CART_KEY.to_string(),
        }
    }
}

impl CartSyncConfig {
    pub fn with_update_debounce(mut self, update_debounce: Duration) -> Self {
        self.update_debounce = update_debounce;
        self
    }

    pub fn with_guest_cart_key(mut self, guest_cart_key: impl Into<String>) -> Self {
        self.guest_cart_key = guest_cart_key.into();
        self
    }
}
