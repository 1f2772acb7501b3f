//! Notifications emitted after cart state transitions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    /// Local cart state changed; readers should re-render.
    Changed { items_qty: u32 },
    /// An operation failed and `CartState::error` was populated.
    Failed { message: String },
}

/// Receives cart events. Implementations must not block.
pub trait CartEventSink: Send + Sync {
    fn emit(&self, event: CartEvent);
}

pub struct NoOpCartEventSink;

impl CartEventSink for NoOpCartEventSink {
    fn emit(&self, _event: CartEvent) {}
}
