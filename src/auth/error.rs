//! Identity provider error types

use thiserror::Error;

/// Provider error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Rejected, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidResponse, message)
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Expired, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Storage, message)
    }
}

impl From<crate::db::DbError> for ProviderError {
    fn from(e: crate::db::DbError) -> Self {
        Self::storage(e.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::invalid_response(e.to_string())
        } else {
            Self::network(e.to_string())
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Could not reach the provider
    Network,
    /// The provider refused the request (`error=` callback, 4xx from token endpoint)
    Rejected,
    /// Response was missing required fields or failed validation
    InvalidResponse,
    /// The sign-in request outlived its prompt timeout
    Expired,
    /// Local bookkeeping failed
    Storage,
}
