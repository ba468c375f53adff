//! Request entry and response types.

use crate::grounding::GroundedAnswer;
use crate::router::RoutingProfile;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One end-user turn submitted to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub prompt: String,
    pub user_id: String,
    /// Existing conversation to continue (a new one is created when absent)
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Idempotency key; reusing a finished id replays its stored outcome
    #[serde(default)]
    pub execution_id: Option<String>,
    /// Opaque caller metadata, visible to routing rules
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl OrchestrationRequest {
    pub fn new(prompt: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            user_id: user_id.into(),
            conversation_id: None,
            execution_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The part of the request stored in the run state.
    pub fn input(&self) -> RequestInput {
        RequestInput {
            prompt: self.prompt.clone(),
            user_id: self.user_id.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Original prompt plus caller metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInput {
    pub prompt: String,
    pub user_id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RequestInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            user_id: String::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Successful outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    /// Fused answer with provenance
    pub answer: GroundedAnswer,
    /// Profile the run was executed under
    pub profile: RoutingProfile,
    /// Run-level cancellation interrupted dispatch
    #[serde(default)]
    pub cancelled: bool,
    /// Served from a stored snapshot instead of being executed
    #[serde(default)]
    pub replayed: bool,
}

impl FinalResponse {
    pub fn text(&self) -> &str {
        &self.answer.text
    }

    pub fn is_partial(&self) -> bool {
        self.answer.partial
    }
}

/// Caller-facing failure. Carries no internal detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub execution_id: String,
    pub message: String,
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "execution {} failed: {}", self.execution_id, self.message)
    }
}

impl std::error::Error for RunError {}

/// Response returned for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    pub execution_id: String,
    pub conversation_id: String,
    pub outcome: std::result::Result<FinalResponse, RunError>,
}

impl OrchestrationResponse {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn final_response(&self) -> Option<&FinalResponse> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RunError> {
        self.outcome.as_ref().err()
    }
}
