//! Generic JSON-over-HTTP capability client.
//!
//! The client posts the [`CapabilityRequest`] as JSON and expects a
//! [`CapabilityOutput`] JSON body back. Status codes are mapped onto
//! [`CapabilityError`] variants so the dispatcher can decide about retries:
//!
//! - 408 → `Timeout`
//! - 429 → `RateLimited`
//! - 5xx → `Unavailable`
//! - other 4xx → `Rejected`

use crate::client::CapabilityClient;
use crate::config::HttpClientConfig;
use crate::error::{CapabilityError, Result};
use crate::secret::{CredentialKind, SecretResolver};
use crate::types::{CapabilityKind, CapabilityOutput, CapabilityRequest};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// HTTP capability client.
#[derive(Clone)]
pub struct HttpCapabilityClient {
    config: HttpClientConfig,
    client: Client,
    secrets: Option<Arc<dyn SecretResolver>>,
}

impl HttpCapabilityClient {
    /// Create a new client with the given configuration.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            config,
            client,
            secrets: None,
        })
    }

    /// Resolve credentials through `secrets` before each call.
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    fn map_status(&self, status: StatusCode, body: String, timeout: Duration) -> CapabilityError {
        let capability = self.config.name.clone();
        match status.as_u16() {
            408 => CapabilityError::Timeout {
                capability,
                timeout,
            },
            429 => CapabilityError::RateLimited(format!("{}: {}", capability, body)),
            500..=599 => CapabilityError::Unavailable {
                capability,
                message: format!("status {}: {}", status.as_u16(), body),
            },
            400..=499 => CapabilityError::Rejected {
                capability,
                message: format!("status {}: {}", status.as_u16(), body),
            },
            other => CapabilityError::Backend {
                status: Some(other),
                message: body,
            },
        }
    }
}

#[async_trait]
impl CapabilityClient for HttpCapabilityClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> CapabilityKind {
        self.config.kind
    }

    async fn invoke(
        &self,
        request: &CapabilityRequest,
        timeout: Duration,
    ) -> Result<CapabilityOutput> {
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .timeout(timeout.min(self.config.timeout()))
            .json(request);

        if let Some(credential_id) = &self.config.credential {
            let secrets = self.secrets.as_ref().ok_or_else(|| {
                CapabilityError::Config(format!(
                    "client '{}' needs a secret resolver for credential '{}'",
                    self.config.name, credential_id
                ))
            })?;
            let credential = secrets.resolve(credential_id).await?;
            builder = match credential.kind {
                CredentialKind::Bearer => {
                    builder.bearer_auth(credential.material.expose_secret())
                }
                CredentialKind::ApiKey => {
                    builder.header("x-api-key", credential.material.expose_secret())
                }
            };
        }

        debug!(
            client = %self.config.name,
            kind = %self.config.kind,
            "Sending capability request"
        );

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CapabilityError::Timeout {
                    capability: self.config.name.clone(),
                    timeout,
                }
            } else if e.is_connect() {
                CapabilityError::Unavailable {
                    capability: self.config.name.clone(),
                    message: e.to_string(),
                }
            } else {
                CapabilityError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.map_status(status, body, timeout));
        }

        let output: CapabilityOutput = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpCapabilityClient {
        HttpCapabilityClient::new(HttpClientConfig::new(
            "kb",
            CapabilityKind::Grounding,
            "http://localhost:9000/search",
        ))
        .unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let c = client();
        let timeout = Duration::from_secs(1);

        let err = c.map_status(StatusCode::TOO_MANY_REQUESTS, "slow".into(), timeout);
        assert!(matches!(err, CapabilityError::RateLimited(_)));
        assert!(err.is_retryable());

        let err = c.map_status(StatusCode::BAD_GATEWAY, "down".into(), timeout);
        assert!(matches!(err, CapabilityError::Unavailable { .. }));
        assert!(err.is_retryable());

        let err = c.map_status(StatusCode::UNPROCESSABLE_ENTITY, "bad".into(), timeout);
        assert!(matches!(err, CapabilityError::Rejected { .. }));
        assert!(!err.is_retryable());

        let err = c.map_status(StatusCode::REQUEST_TIMEOUT, String::new(), timeout);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = HttpCapabilityClient::new(HttpClientConfig::new(
            "",
            CapabilityKind::Llm,
            "http://localhost",
        ));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_credential_without_resolver_is_config_error() {
        let c = HttpCapabilityClient::new(
            HttpClientConfig::new("kb", CapabilityKind::Grounding, "http://127.0.0.1:9/search")
                .with_credential("kb"),
        )
        .unwrap();

        let request = CapabilityRequest::new(CapabilityKind::Grounding, "rust");
        let err = c
            .invoke(&request, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Config(_)));
    }
}
