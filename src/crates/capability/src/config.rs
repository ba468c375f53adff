//! Configuration for HTTP-backed capability clients.

use crate::error::{CapabilityError, Result};
use crate::types::CapabilityKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a capability served over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Client name, unique within its kind.
    pub name: String,

    /// Kind of capability served by the endpoint.
    pub kind: CapabilityKind,

    /// Endpoint receiving `POST` requests with the JSON capability request.
    ///
    /// Examples:
    /// - "http://localhost:8700/invoke"
    /// - "https://agents.internal/research/invoke"
    pub endpoint: String,

    /// Credential id resolved through the secret service (None = no auth).
    #[serde(default)]
    pub credential: Option<String>,

    /// Transport-level request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl HttpClientConfig {
    /// Create a new HTTP client configuration.
    pub fn new(
        name: impl Into<String>,
        kind: CapabilityKind,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: endpoint.into(),
            credential: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Set the credential id.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Set the transport timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Transport timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CapabilityError::Config("client name cannot be empty".into()));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(CapabilityError::Config(format!(
                "endpoint for '{}' must be an http(s) URL",
                self.name
            )));
        }
        if self.timeout_ms == 0 {
            return Err(CapabilityError::Config(format!(
                "timeout for '{}' must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

fn default_timeout_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_builder() {
        let config = HttpClientConfig::new(
            "research",
            CapabilityKind::Agent,
            "https://agents.example.com/invoke",
        )
        .with_credential("research-agent")
        .with_timeout(Duration::from_secs(30));

        assert_eq!(config.credential.as_deref(), Some("research-agent"));
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_config_rejects_bad_endpoint() {
        let config = HttpClientConfig::new("x", CapabilityKind::Tool, "ftp://nope");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_config_deserialize_defaults() {
        let config: HttpClientConfig = serde_json::from_str(
            r#"{"name": "kb", "kind": "grounding", "endpoint": "http://localhost:9000/search"}"#,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 60_000);
        assert!(config.credential.is_none());
    }
}
