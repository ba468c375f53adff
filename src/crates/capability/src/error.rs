//! Error types for capability clients.

use crate::types::CapabilityKind;
use std::time::Duration;
use thiserror::Error;

/// Result type for capability operations.
pub type Result<T> = std::result::Result<T, CapabilityError>;

/// Errors that can occur when invoking a capability.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The call did not complete within its timeout.
    #[error("{capability} timed out after {}ms", timeout.as_millis())]
    Timeout {
        capability: String,
        timeout: Duration,
    },

    /// Backend is temporarily unavailable (not running, overloaded, 5xx).
    #[error("Service unavailable: {capability}: {message}")]
    Unavailable { capability: String, message: String },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Backend answered with an error status that carries no clearer class.
    #[error("Backend error (status {status:?}): {message}")]
    Backend {
        status: Option<u16>,
        message: String,
    },

    /// Backend refused the request; retrying will not help.
    #[error("Request rejected by {capability}: {message}")]
    Rejected { capability: String, message: String },

    /// Failure reported by a client with an explicit retry hint.
    #[error("{kind} failure: {message}")]
    Failed {
        kind: String,
        message: String,
        retryable: bool,
    },

    /// No client registered for the requested kind/target.
    #[error("No {kind} client registered{}", target.as_ref().map(|t| format!(" for '{}'", t)).unwrap_or_default())]
    NotRegistered {
        kind: CapabilityKind,
        target: Option<String>,
    },

    /// Credential could not be resolved.
    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    /// Failed to serialize/deserialize a payload.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid response from a backend.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CapabilityError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            CapabilityError::Http(e) => !e.is_builder() && !e.is_decode(),
            CapabilityError::Timeout { .. }
            | CapabilityError::Unavailable { .. }
            | CapabilityError::RateLimited(_) => true,
            CapabilityError::Backend { status, .. } => {
                matches!(status, Some(408) | Some(429) | Some(500..=599))
            }
            CapabilityError::Failed { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            CapabilityError::Timeout { .. } => true,
            CapabilityError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Short machine-readable label, safe to persist.
    pub fn kind_label(&self) -> &'static str {
        match self {
            CapabilityError::Http(_) => "http",
            CapabilityError::Timeout { .. } => "timeout",
            CapabilityError::Unavailable { .. } => "unavailable",
            CapabilityError::RateLimited(_) => "rate_limited",
            CapabilityError::Backend { .. } => "backend",
            CapabilityError::Rejected { .. } => "rejected",
            CapabilityError::Failed { .. } => "failed",
            CapabilityError::NotRegistered { .. } => "not_registered",
            CapabilityError::CredentialNotFound(_) => "credential",
            CapabilityError::Serialization(_) => "serialization",
            CapabilityError::InvalidResponse(_) => "invalid_response",
            CapabilityError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for CapabilityError {
    fn from(err: serde_json::Error) -> Self {
        CapabilityError::Serialization(err.to_string())
    }
}
