//! Secret lookup for capability credentials.
//!
//! Credentials live in an external service; clients only hold a credential id
//! and resolve the material right before a call. Material is kept in a
//! [`SecretString`] so it never shows up in `Debug` output or logs.

use crate::error::{CapabilityError, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the credential material is presented to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Sent as `Authorization: Bearer <material>`
    Bearer,
    /// Sent as `x-api-key: <material>`
    ApiKey,
}

/// Resolved credential.
#[derive(Debug, Clone)]
pub struct Credential {
    pub kind: CredentialKind,
    pub material: SecretString,
}

impl Credential {
    pub fn bearer(material: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::Bearer,
            material: SecretString::from(material.into()),
        }
    }

    pub fn api_key(material: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::ApiKey,
            material: SecretString::from(material.into()),
        }
    }
}

/// Opaque credential lookup service.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, credential_id: &str) -> Result<Credential>;
}

/// Resolves credentials from environment variables.
///
/// `openai` resolves to `<PREFIX>OPENAI`, with non-alphanumerics mapped to `_`.
#[derive(Debug, Clone)]
pub struct EnvSecretResolver {
    prefix: String,
    kind: CredentialKind,
}

impl EnvSecretResolver {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            kind: CredentialKind::Bearer,
        }
    }

    pub fn with_kind(mut self, kind: CredentialKind) -> Self {
        self.kind = kind;
        self
    }

    /// Environment variable consulted for `credential_id`.
    pub fn var_name(&self, credential_id: &str) -> String {
        let suffix: String = credential_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

impl Default for EnvSecretResolver {
    fn default() -> Self {
        Self::new("SWITCHBOARD_SECRET_")
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, credential_id: &str) -> Result<Credential> {
        let var = self.var_name(credential_id);
        let material = std::env::var(&var)
            .map_err(|_| CapabilityError::CredentialNotFound(credential_id.to_string()))?;
        Ok(Credential {
            kind: self.kind,
            material: SecretString::from(material),
        })
    }
}

/// Fixed in-memory credentials, mostly for tests and local setups.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretResolver {
    credentials: HashMap<String, Credential>,
}

impl StaticSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(mut self, id: impl Into<String>, credential: Credential) -> Self {
        self.credentials.insert(id.into(), credential);
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, credential_id: &str) -> Result<Credential> {
        self.credentials
            .get(credential_id)
            .cloned()
            .ok_or_else(|| CapabilityError::CredentialNotFound(credential_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_debug_never_shows_material() {
        let credential = Credential::bearer("sk-very-secret");
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("sk-very-secret"));
        assert_eq!(credential.material.expose_secret(), "sk-very-secret");
    }

    #[test]
    fn test_env_var_name() {
        let resolver = EnvSecretResolver::new("APP_");
        assert_eq!(resolver.var_name("search-api.v2"), "APP_SEARCH_API_V2");
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver =
            StaticSecretResolver::new().with_credential("agent", Credential::api_key("k-1"));

        let credential = resolver.resolve("agent").await.unwrap();
        assert_eq!(credential.kind, CredentialKind::ApiKey);
        assert!(matches!(
            resolver.resolve("missing").await,
            Err(CapabilityError::CredentialNotFound(_))
        ));
    }
}
