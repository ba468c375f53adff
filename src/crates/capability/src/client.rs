//! The capability client contract and the registry that resolves clients.
//!
//! Every backend (LLM, agent, tool, grounding source) sits behind the same
//! [`CapabilityClient`] trait. The [`CapabilityRegistry`] is built once at
//! startup and is read-only afterwards; there is no process-wide registry.

use crate::error::{CapabilityError, Result};
use crate::types::{CapabilityKind, CapabilityOutput, CapabilityRequest};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Uniform async call interface for one backend.
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    /// Client name, unique within its kind.
    fn name(&self) -> &str;

    /// Kind of backend this client talks to.
    fn kind(&self) -> CapabilityKind;

    /// Invoke the backend. `timeout` is advisory for the client's own transport;
    /// the dispatcher enforces it independently.
    async fn invoke(&self, request: &CapabilityRequest, timeout: Duration)
        -> Result<CapabilityOutput>;
}

#[derive(Default)]
struct KindClients {
    default: Option<String>,
    by_name: HashMap<String, Arc<dyn CapabilityClient>>,
}

/// Read-only lookup from (kind, target) to a client.
#[derive(Default)]
pub struct CapabilityRegistry {
    kinds: BTreeMap<CapabilityKind, KindClients>,
}

impl CapabilityRegistry {
    /// Start building a registry.
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    /// Resolve the client for `kind`, using `target` when given and the kind's
    /// default client otherwise.
    pub fn resolve(
        &self,
        kind: CapabilityKind,
        target: Option<&str>,
    ) -> Result<Arc<dyn CapabilityClient>> {
        let not_registered = || CapabilityError::NotRegistered {
            kind,
            target: target.map(str::to_string),
        };

        let clients = self.kinds.get(&kind).ok_or_else(not_registered)?;
        let name = match target {
            Some(name) => name,
            None => clients.default.as_deref().ok_or_else(not_registered)?,
        };

        clients.by_name.get(name).cloned().ok_or_else(not_registered)
    }

    /// Check whether any client is registered for `kind`.
    pub fn has_kind(&self, kind: CapabilityKind) -> bool {
        self.kinds
            .get(&kind)
            .map(|c| !c.by_name.is_empty())
            .unwrap_or(false)
    }

    /// Check whether a named client exists for `kind`.
    pub fn contains(&self, kind: CapabilityKind, name: &str) -> bool {
        self.kinds
            .get(&kind)
            .map(|c| c.by_name.contains_key(name))
            .unwrap_or(false)
    }

    /// Names registered for `kind`, sorted.
    pub fn names(&self, kind: CapabilityKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .kinds
            .get(&kind)
            .map(|c| c.by_name.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Total number of registered clients.
    pub fn len(&self) -> usize {
        self.kinds.values().map(|c| c.by_name.len()).sum()
    }

    /// Check if no client is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, clients) in &self.kinds {
            let mut names: Vec<&String> = clients.by_name.keys().collect();
            names.sort();
            map.entry(kind, &names);
        }
        map.finish()
    }
}

/// Builder for [`CapabilityRegistry`].
#[derive(Default)]
pub struct CapabilityRegistryBuilder {
    kinds: BTreeMap<CapabilityKind, KindClients>,
}

impl CapabilityRegistryBuilder {
    /// Register a client. The first client of each kind becomes its default.
    pub fn register(mut self, client: Arc<dyn CapabilityClient>) -> Self {
        let entry = self.kinds.entry(client.kind()).or_default();
        let name = client.name().to_string();
        if entry.default.is_none() {
            entry.default = Some(name.clone());
        }
        entry.by_name.insert(name, client);
        self
    }

    /// Override the default client for a kind.
    pub fn default_for(mut self, kind: CapabilityKind, name: impl Into<String>) -> Self {
        self.kinds.entry(kind).or_default().default = Some(name.into());
        self
    }

    /// Finish the registry, checking every default points at a registered client.
    pub fn build(self) -> Result<CapabilityRegistry> {
        for (kind, clients) in &self.kinds {
            if let Some(default) = &clients.default {
                if !clients.by_name.contains_key(default) {
                    return Err(CapabilityError::Config(format!(
                        "default {} client '{}' is not registered",
                        kind, default
                    )));
                }
            }
        }
        Ok(CapabilityRegistry { kinds: self.kinds })
    }
}
