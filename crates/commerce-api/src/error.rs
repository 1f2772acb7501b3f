//! Error types for the commerce API crate.

use thiserror::Error;

/// Result type alias for commerce API calls.
pub type Result<T> = std::result::Result<T, CommerceApiError>;

/// Errors that can occur while talking to the commerce backend.
#[derive(Debug, Error)]
pub enum CommerceApiError {
    /// HTTP client error (connect, timeout, body)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the backend. `message` may still hold `%name`
    /// placeholders that `parameters` resolve.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        parameters: Vec<(String, String)>,
    },

    /// Invalid request (missing configuration, malformed input)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (unusable bearer token)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl CommerceApiError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            parameters: Vec::new(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<CommerceApiError> for storefront_core::Error {
    fn from(err: CommerceApiError) -> Self {
        match err {
            CommerceApiError::Http(err) => Self::Transport(err.to_string()),
            CommerceApiError::Json(err) => Self::Serialization(err),
            CommerceApiError::Api {
                status,
                message,
                parameters,
            } => Self::Api {
                status,
                message,
                parameters,
            },
            CommerceApiError::InvalidRequest(message) => Self::InvalidRequest(message),
            // The backend would answer 401 for the same token.
            CommerceApiError::Auth(message) => Self::Api {
                status: 401,
                message,
                parameters: Vec::new(),
            },
        }
    }
}
