//! Caller-supplied authentication context.

use std::fmt;

/// Who the cart operations act for.
///
/// The presence of a customer token alone decides guest-vs-customer routing.
#[derive(Clone, PartialEq, Eq)]
pub enum Session {
    Guest,
    Customer { token: String },
}

impl Session {
    /// Build a session from an optional bearer token; blank tokens count as guest.
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(token) if !token.trim().is_empty() => Self::Customer { token },
            _ => Self::Guest,
        }
    }

    pub fn customer(token: impl Into<String>) -> Self {
        Self::from_token(Some(token.into()))
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Customer { token } => Some(token),
            Self::Guest => None,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest)
    }
}

// Keeps bearer tokens out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guest => f.write_str("Guest"),
            Self::Customer { .. } => f.write_str("Customer { token: <redacted> }"),
        }
    }
}
