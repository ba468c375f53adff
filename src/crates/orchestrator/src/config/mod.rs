//! Configuration for the orchestration engine
//!
//! - [`EngineConfig`]: the full engine document and its environment overrides
//! - [`RouterConfig`]: intent rules and the optional classifier
//! - loader helpers: `$include` files and `${VAR:default}` expansion

pub mod engine;
pub mod loader;
pub mod router;

pub use engine::{CapabilityBinding, EngineConfig, MemoryConfig, PlannerConfig, PlannerKind};
pub use loader::{deep_merge, load_config_file, load_yaml_config, load_yaml_file, parse_yaml_str};
pub use router::{ClassifierConfig, ConditionCheck, RouteRule, RouterConfig, RuleCondition};
