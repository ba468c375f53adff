//! Engine configuration
//!
//! One serde document with a section per component. Files can be YAML, JSON
//! or TOML; `SWITCHBOARD_*` environment variables override individual knobs.

use crate::config::loader;
use crate::config::router::RouterConfig;
use crate::executor::{DispatchConfig, RetryConfig};
use crate::grounding::GroundingConfig;
use crate::{OrchestratorError, Result};
use capability::{CapabilityKind, HttpClientConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

pub const ENV_CONFIDENCE_THRESHOLD: &str = "SWITCHBOARD_CONFIDENCE_THRESHOLD";
pub const ENV_MAX_RETRIES: &str = "SWITCHBOARD_MAX_RETRIES";
pub const ENV_CALL_TIMEOUT_MS: &str = "SWITCHBOARD_CALL_TIMEOUT_MS";
pub const ENV_MAX_CONCURRENCY: &str = "SWITCHBOARD_MAX_CONCURRENCY";
pub const ENV_RUN_TIMEOUT_MS: &str = "SWITCHBOARD_RUN_TIMEOUT_MS";
pub const ENV_CACHE_ENABLED: &str = "SWITCHBOARD_CACHE_ENABLED";

/// Which planner decomposes multi-step requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    /// Text-structure planner, no capability calls
    #[default]
    Heuristic,
    /// Asks an llm client for a JSON decomposition
    Capability,
}

/// Planner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub kind: PlannerKind,
    /// Named llm client for the capability planner
    pub target: Option<String>,
    /// Upper bound on tasks per plan
    pub max_tasks: usize,
    /// Timeout for the planner call in milliseconds
    pub timeout_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            kind: PlannerKind::Heuristic,
            target: None,
            max_tasks: 8,
            timeout_ms: 20_000,
        }
    }
}

impl PlannerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Conversation memory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Number of previous turns passed to capabilities as context
    pub history_window: usize,
    /// Retry policy for conversation write-back
    pub write_back: RetryConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_window: 10,
            write_back: RetryConfig::default(),
        }
    }
}

/// A capability client declared in configuration.
///
/// Bindings with an endpoint become HTTP clients; the CLI answers the rest
/// with offline echo clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityBinding {
    pub name: String,
    pub kind: CapabilityKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Credential id resolved through the secret resolver
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Make this the default client of its kind
    #[serde(default)]
    pub default: bool,
}

impl CapabilityBinding {
    pub fn new(name: impl Into<String>, kind: CapabilityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: None,
            credential: None,
            timeout_ms: None,
            default: false,
        }
    }

    /// HTTP client configuration, when the binding has an endpoint.
    pub fn http_config(&self) -> Option<HttpClientConfig> {
        let endpoint = self.endpoint.as_ref()?;
        let mut config = HttpClientConfig::new(self.name.clone(), self.kind, endpoint.clone());
        config.credential = self.credential.clone();
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        Some(config)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub router: RouterConfig,
    pub planner: PlannerConfig,
    pub dispatch: DispatchConfig,
    pub grounding: GroundingConfig,
    pub memory: MemoryConfig,
    /// Whole-run deadline; tripping it cancels outstanding tasks
    pub run_timeout_ms: Option<u64>,
    pub capabilities: Vec<CapabilityBinding>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            planner: PlannerConfig::default(),
            dispatch: DispatchConfig::default(),
            grounding: GroundingConfig::default(),
            memory: MemoryConfig::default(),
            run_timeout_ms: Some(120_000),
            capabilities: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load from a YAML, JSON or TOML file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        loader::load_config_file(path)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        loader::parse_yaml_str(content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| OrchestratorError::Config(format!("failed to parse JSON config: {}", e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| OrchestratorError::Config(format!("failed to parse TOML config: {}", e)))
    }

    /// Load a file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }

    /// Apply `SWITCHBOARD_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CONFIDENCE_THRESHOLD) {
            self.router.confidence_threshold = parse_override(ENV_CONFIDENCE_THRESHOLD, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            self.dispatch.retry.max_retries = parse_override(ENV_MAX_RETRIES, &value)?;
        }
        if let Some(value) = lookup(ENV_CALL_TIMEOUT_MS) {
            self.dispatch.call_timeout_ms = parse_override(ENV_CALL_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENCY) {
            self.dispatch.max_concurrency = parse_override(ENV_MAX_CONCURRENCY, &value)?;
        }
        if let Some(value) = lookup(ENV_RUN_TIMEOUT_MS) {
            let timeout: u64 = parse_override(ENV_RUN_TIMEOUT_MS, &value)?;
            self.run_timeout_ms = if timeout == 0 { None } else { Some(timeout) };
        }
        if let Some(value) = lookup(ENV_CACHE_ENABLED) {
            self.dispatch.cache.enabled = parse_override(ENV_CACHE_ENABLED, &value)?;
        }
        Ok(())
    }

    /// Reject unusable values.
    pub fn validate(&self) -> Result<()> {
        self.router.validate()?;
        self.dispatch.validate()?;
        self.grounding.validate()?;
        self.memory
            .write_back
            .validate()
            .map_err(|e| OrchestratorError::Config(format!("memory.write_back: {}", e)))?;

        if self.planner.max_tasks == 0 {
            return Err(OrchestratorError::Config(
                "planner.max_tasks must be at least 1".into(),
            ));
        }
        if self.planner.timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "planner.timeout_ms must be greater than 0".into(),
            ));
        }
        if self.run_timeout_ms == Some(0) {
            return Err(OrchestratorError::Config(
                "run_timeout_ms must be greater than 0 (omit it to disable)".into(),
            ));
        }

        let mut names = HashSet::new();
        let mut defaults = HashSet::new();
        for binding in &self.capabilities {
            if binding.name.trim().is_empty() {
                return Err(OrchestratorError::Config(
                    "capability binding name cannot be empty".into(),
                ));
            }
            if !names.insert((binding.kind, binding.name.as_str())) {
                return Err(OrchestratorError::Config(format!(
                    "duplicate {} capability '{}'",
                    binding.kind, binding.name
                )));
            }
            if binding.default && !defaults.insert(binding.kind) {
                return Err(OrchestratorError::Config(format!(
                    "more than one default {} capability",
                    binding.kind
                )));
            }
            if let Some(http) = binding.http_config() {
                http.validate()
                    .map_err(|e| OrchestratorError::Config(e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| OrchestratorError::Config(format!("invalid value '{}' for {}", value, name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.retry.max_retries, 2);
        assert_eq!(config.planner.max_tasks, 8);
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_yaml_sections() {
        let config = EngineConfig::from_yaml_str(
            r#"
router:
  confidence_threshold: 0.7
planner:
  kind: capability
  target: planner-llm
dispatch:
  call_timeout_ms: 1500
  retry:
    max_retries: 1
  cache:
    normalized: true
capabilities:
  - name: local
    kind: llm
    default: true
  - name: search
    kind: grounding
    endpoint: https://search.example/invoke
    credential: SEARCH
"#,
        )
        .unwrap();

        assert_eq!(config.router.confidence_threshold, 0.7);
        assert_eq!(config.planner.kind, PlannerKind::Capability);
        assert_eq!(config.dispatch.call_timeout_ms, 1500);
        assert_eq!(config.dispatch.retry.max_retries, 1);
        assert!(config.dispatch.cache.normalized);
        assert_eq!(config.dispatch.max_concurrency, 4);
        assert_eq!(config.capabilities.len(), 2);
        assert!(config.capabilities[0].http_config().is_none());
        assert_eq!(
            config.capabilities[1].http_config().unwrap().credential.as_deref(),
            Some("SEARCH")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_and_json() {
        let config = EngineConfig::from_toml_str(
            r#"
run_timeout_ms = 5000

[dispatch]
max_concurrency = 2
"#,
        )
        .unwrap();
        assert_eq!(config.run_timeout_ms, Some(5000));
        assert_eq!(config.dispatch.max_concurrency, 2);

        let config = EngineConfig::from_json_str(r#"{"grounding": {"retrieve_evidence": false}}"#).unwrap();
        assert!(!config.grounding.retrieve_evidence);
    }

    #[test]
    fn test_from_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile()?;
        writeln!(file, "planner:\n  max_tasks: 3")?;
        let config = EngineConfig::load(file.path())?;
        assert_eq!(config.planner.max_tasks, 3);
        Ok(())
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_CONFIDENCE_THRESHOLD, "0.8"),
            (ENV_MAX_RETRIES, "4"),
            (ENV_RUN_TIMEOUT_MS, "0"),
            (ENV_CACHE_ENABLED, "false"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.router.confidence_threshold, 0.8);
        assert_eq!(config.dispatch.retry.max_retries, 4);
        assert_eq!(config.run_timeout_ms, None);
        assert!(!config.dispatch.cache.enabled);
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides_from(|name| (name == ENV_MAX_CONCURRENCY).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(msg) if msg.contains(ENV_MAX_CONCURRENCY)));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = EngineConfig::default();
        config.planner.max_tasks = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.capabilities = vec![
            CapabilityBinding::new("a", CapabilityKind::Llm),
            CapabilityBinding::new("a", CapabilityKind::Llm),
        ];
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        let mut binding = CapabilityBinding::new("remote", CapabilityKind::Tool);
        binding.endpoint = Some("ftp://nope".into());
        config.capabilities = vec![binding];
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.dispatch.retry.backoff_multiplier = 1.0;
        assert!(config.validate().is_err());
    }
}
