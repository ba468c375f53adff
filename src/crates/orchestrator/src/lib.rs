//! Orchestration graph for switchboard
//!
//! This crate routes one end-user turn through a variable-length pipeline of
//! capability calls: intent classification, optional decomposition into a task
//! DAG, concurrent dispatch with bounded retry, fusion of the results with
//! their evidence, and conversation write-back.
//!
//! The entry point is [`GraphEngine`](graph::GraphEngine):
//!
//! ```rust,ignore
//! use orchestrator::{EngineConfig, GraphEngine, OrchestrationRequest};
//! use capability::{CapabilityKind, CapabilityRegistry, EchoClient};
//! use memory_store::InMemoryStore;
//! use std::sync::Arc;
//!
//! let registry = CapabilityRegistry::builder()
//!     .register(Arc::new(EchoClient::new("offline", CapabilityKind::Llm)))
//!     .build()?;
//! let engine = GraphEngine::new(EngineConfig::default(), Arc::new(registry), Arc::new(InMemoryStore::new()))?;
//!
//! let response = engine.run(OrchestrationRequest::new("What is Rust?", "user-1")).await;
//! ```

pub mod config;
pub mod executor;
pub mod graph;
pub mod grounding;
pub mod parser;
pub mod planner;
pub mod request;
pub mod router;

use capability::{CapabilityError, CapabilityKind};
use memory_store::MemoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::EngineConfig;
pub use executor::{TaskFailure, TaskResult};
pub use graph::{GraphEngine, GraphState, Node};
pub use planner::{Plan, PlanError};
pub use request::{FinalResponse, OrchestrationRequest, OrchestrationResponse, RunError};
pub use router::{RoutingDecision, RoutingProfile};

/// Errors that can occur during orchestration
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Intent could not be classified with enough confidence
    #[error("Intent classification degraded: {0}")]
    ClassificationDegraded(String),

    /// Planner produced an unusable task graph
    #[error("Plan invalid: {0}")]
    PlanInvalid(#[from] PlanError),

    /// Capability call exceeded its timeout
    #[error("Capability {capability} timed out after {timeout_ms}ms")]
    CapabilityTimeout { capability: String, timeout_ms: u64 },

    /// Capability is temporarily unavailable
    #[error("Capability {capability} unavailable: {message}")]
    CapabilityUnavailable { capability: String, message: String },

    /// Capability refused the request
    #[error("Capability {capability} rejected the request: {message}")]
    CapabilityRejected { capability: String, message: String },

    /// Every task in the plan failed
    #[error("All {} tasks failed in execution {execution_id}", failures.len())]
    AllTasksFailed {
        execution_id: String,
        failures: Vec<TaskFailure>,
    },

    /// Nothing usable was produced (for example a run cancelled before any task finished)
    #[error("No usable results for execution {0}")]
    NoUsableResults(String),

    /// Memory store error
    #[error("Persistence error: {0}")]
    Persistence(#[from] MemoryError),

    /// Invalid state transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Mutation of a terminal execution
    #[error("Execution {0} is sealed")]
    StateSealed(String),

    /// Second write to a results key
    #[error("Result for '{0}' already recorded")]
    ResultAlreadyRecorded(String),

    /// Another run owns the execution id
    #[error("Execution {0} is already in flight")]
    ExecutionInFlight(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error
    #[error("Orchestrator error: {0}")]
    General(String),
}

impl OrchestratorError {
    /// Short machine-readable label, safe to persist.
    pub fn kind_label(&self) -> &'static str {
        match self {
            OrchestratorError::ClassificationDegraded(_) => "classification_degraded",
            OrchestratorError::PlanInvalid(_) => "plan_invalid",
            OrchestratorError::CapabilityTimeout { .. } => "capability_timeout",
            OrchestratorError::CapabilityUnavailable { .. } => "capability_unavailable",
            OrchestratorError::CapabilityRejected { .. } => "capability_rejected",
            OrchestratorError::AllTasksFailed { .. } => "all_tasks_failed",
            OrchestratorError::NoUsableResults(_) => "no_usable_results",
            OrchestratorError::Persistence(_) => "persistence",
            OrchestratorError::InvalidStateTransition { .. } => "invalid_state_transition",
            OrchestratorError::StateSealed(_) => "state_sealed",
            OrchestratorError::ResultAlreadyRecorded(_) => "result_already_recorded",
            OrchestratorError::ExecutionInFlight(_) => "execution_in_flight",
            OrchestratorError::Config(_) => "config",
            OrchestratorError::Serialization(_) => "serialization",
            OrchestratorError::General(_) => "general",
        }
    }

    /// Whether retrying the failed operation may help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::CapabilityTimeout { .. }
                | OrchestratorError::CapabilityUnavailable { .. }
                | OrchestratorError::Persistence(_)
        )
    }

    /// Message shown to the caller. Never carries internal detail.
    pub fn user_message(&self) -> &'static str {
        Self::user_message_for(self.kind_label())
    }

    /// Caller-facing message for a persisted kind label.
    pub fn user_message_for(kind_label: &str) -> &'static str {
        match kind_label {
            "all_tasks_failed" => "all capability calls failed",
            "no_usable_results" => "no usable results were produced",
            "execution_in_flight" => "execution is already in progress",
            _ => "internal orchestration error",
        }
    }
}

impl From<CapabilityError> for OrchestratorError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Timeout {
                capability,
                timeout,
            } => OrchestratorError::CapabilityTimeout {
                capability,
                timeout_ms: timeout.as_millis() as u64,
            },
            CapabilityError::Unavailable {
                capability,
                message,
            } => OrchestratorError::CapabilityUnavailable {
                capability,
                message,
            },
            CapabilityError::Rejected {
                capability,
                message,
            } => OrchestratorError::CapabilityRejected {
                capability,
                message,
            },
            CapabilityError::Failed {
                kind,
                message,
                retryable: true,
            } => OrchestratorError::CapabilityUnavailable {
                capability: kind,
                message,
            },
            CapabilityError::Failed { kind, message, .. } => OrchestratorError::CapabilityRejected {
                capability: kind,
                message,
            },
            CapabilityError::NotRegistered { kind, target } => OrchestratorError::Config(format!(
                "no {} client registered{}",
                kind,
                target.map(|t| format!(" for '{}'", t)).unwrap_or_default()
            )),
            other => OrchestratorError::General(other.to_string()),
        }
    }
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Task execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting for its dependencies
    Pending,
    /// Task is currently running
    Running,
    /// Task completed successfully
    Done,
    /// Task failed
    Failed,
    /// Task will not run (failed dependency or cancellation)
    Skipped,
}

impl TaskStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One unit of work in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier, unique within its plan
    pub id: String,
    /// Capability kind to invoke
    pub capability: CapabilityKind,
    /// Named client (None = the kind's default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Prompt or instruction for the capability
    pub input: String,
    /// Tasks that must be done first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Current status
    #[serde(default = "default_status")]
    pub status: TaskStatus,
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

impl Task {
    /// Create a new pending task
    pub fn new(id: impl Into<String>, capability: CapabilityKind, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability,
            target: None,
            input: input.into(),
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
        }
    }

    /// Route the task to a named client
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Add a dependency
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Update task status
    pub fn update_status(&mut self, status: TaskStatus) -> Result<()> {
        let allowed = match (self.status, status) {
            (from, _) if from.is_terminal() => false,
            (TaskStatus::Pending, TaskStatus::Running | TaskStatus::Skipped) => true,
            (TaskStatus::Running, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Skipped) => {
                true
            }
            _ => false,
        };

        if !allowed {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }

        self.status = status;
        Ok(())
    }
}

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_task_creation() {
        let task = Task::new("t2", CapabilityKind::Tool, "2 + 2")
            .with_target("calculator")
            .depends_on("t1");

        assert_eq!(task.id, "t2");
        assert_eq!(task.target.as_deref(), Some("calculator"));
        assert_eq!(task.depends_on, vec!["t1".to_string()]);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_task_status_update() {
        let mut task = Task::new("t1", CapabilityKind::Llm, "hi");

        assert!(task.update_status(TaskStatus::Running).is_ok());
        assert!(task.update_status(TaskStatus::Done).is_ok());

        // Cannot leave a terminal status
        assert!(task.update_status(TaskStatus::Running).is_err());
    }

    #[test]
    fn test_pending_task_cannot_finish_without_running() {
        let mut task = Task::new("t1", CapabilityKind::Llm, "hi");
        assert!(task.update_status(TaskStatus::Done).is_err());
        assert!(task.update_status(TaskStatus::Skipped).is_ok());
    }

    #[test]
    fn test_capability_error_mapping() {
        let err: OrchestratorError = CapabilityError::Timeout {
            capability: "llm".into(),
            timeout: Duration::from_millis(1500),
        }
        .into();
        assert!(matches!(
            err,
            OrchestratorError::CapabilityTimeout { timeout_ms: 1500, .. }
        ));
        assert!(err.is_retryable());

        let err: OrchestratorError = CapabilityError::Failed {
            kind: "tool".into(),
            message: "bad input".into(),
            retryable: false,
        }
        .into();
        assert!(matches!(err, OrchestratorError::CapabilityRejected { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_user_message_hides_detail() {
        let err = OrchestratorError::General("db password=hunter2".into());
        assert_eq!(err.user_message(), "internal orchestration error");
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
