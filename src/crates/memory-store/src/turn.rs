//! Conversation turns and run-state snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// One message in a conversation's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the conversation, assigned by the store on append (1-based)
    #[serde(default)]
    pub sequence: u64,
    pub role: TurnRole,
    pub content: String,
    /// Execution that produced the turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Turn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            role,
            content: content.into(),
            execution_id: None,
            created_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn with_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Lifecycle status recorded with a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl SnapshotStatus {
    /// Terminal snapshots can no longer be replaced.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SnapshotStatus::InProgress)
    }
}

/// Persisted view of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub execution_id: String,
    pub conversation_id: String,
    pub status: SnapshotStatus,
    /// Serialized run state
    pub state: Value,
    pub saved_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn new(
        execution_id: impl Into<String>,
        conversation_id: impl Into<String>,
        status: SnapshotStatus,
        state: Value,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            conversation_id: conversation_id.into(),
            status,
            state,
            saved_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
