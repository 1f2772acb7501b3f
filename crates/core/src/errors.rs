//! Error types for the storefront core crate.

use thiserror::Error;

/// Result type alias for storefront operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message shown to the user for failures that carry no backend explanation.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Parameter names the backend uses when it reports a missing cart.
const CART_ID_FIELDS: [&str; 3] = ["cartId", "quoteId", "cart_id"];

/// Retry policy class for failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors surfaced by the cart synchronization engine and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-level failure (timeout, connection refused, truncated body).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Business or validation error returned by the commerce backend.
    ///
    /// `message` still holds the backend's `%name` / `%1` placeholders;
    /// `parameters` carries the values to substitute.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        parameters: Vec<(String, String)>,
    },

    /// Local precondition failed; no network call was attempted.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Local persistent store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an API error without placeholder parameters.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            parameters: Vec::new(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => RetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
                500..=599 => RetryClass::Retryable,
                _ => RetryClass::Permanent,
            },
            Self::Transport(_) => RetryClass::Retryable,
            Self::InvalidRequest(_) | Self::Storage(_) | Self::Serialization(_) => {
                RetryClass::Permanent
            }
        }
    }

    /// Returns true when the backend reports that the targeted cart no longer exists.
    ///
    /// The backend answers with a field-level "no such entity" error naming the
    /// cart identifier field, or with "no active cart" for customer carts.
    pub fn is_cart_missing(&self) -> bool {
        let Self::Api {
            status,
            message,
            parameters,
        } = self
        else {
            return false;
        };
        if !matches!(*status, 400 | 404) {
            return false;
        }

        let names_cart_field = parameters
            .iter()
            .any(|(_, value)| CART_ID_FIELDS.contains(&value.as_str()))
            || CART_ID_FIELDS.iter().any(|field| message.contains(field));
        let lowered = message.to_ascii_lowercase();

        (names_cart_field && lowered.contains("no such entity")) || lowered.contains("active cart")
    }

    /// User-displayable message.
    ///
    /// Backend messages are shown verbatim with their placeholders resolved;
    /// transport and internal failures collapse to a generic retry prompt.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api {
                message,
                parameters,
                ..
            } => render_placeholders(message, parameters),
            Self::InvalidRequest(message) => message.clone(),
            Self::Transport(_) | Self::Storage(_) | Self::Serialization(_) => {
                GENERIC_FAILURE_MESSAGE.to_string()
            }
        }
    }
}

/// Substitute `%name` placeholders, longest names first so `%10` never eats `%1`.
fn render_placeholders(message: &str, parameters: &[(String, String)]) -> String {
    let mut ordered: Vec<&(String, String)> = parameters.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut rendered = message.to_string();
    for (name, value) in ordered {
        rendered = rendered.replace(&format!("%{}", name), value);
    }
    rendered
}
