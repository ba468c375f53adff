//! The storage contract consumed by the orchestrator.
//!
//! # Overview
//!
//! A [`MemoryStore`] holds three independent kinds of data:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  MemoryStore                                          │
//! │                                                       │
//! │  conversations: conversation_id -> [Turn, Turn, ...]  │
//! │                 (append-only, sequence assigned)      │
//! │                                                       │
//! │  cache:         Fingerprint -> Value (+ optional TTL) │
//! │                                                       │
//! │  states:        execution_id -> StateSnapshot         │
//! │                 (terminal snapshots are sealed)       │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Implementations must serialize appends within one conversation while
//! letting different conversations proceed without contention.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use memory_store::{MemoryStore, Turn, Fingerprint, StateSnapshot, Result};
//! use async_trait::async_trait;
//!
//! struct RedisStore { /* ... */ }
//!
//! #[async_trait]
//! impl MemoryStore for RedisStore {
//!     async fn get_history(&self, conversation_id: &str, limit: Option<usize>) -> Result<Vec<Turn>> {
//!         // LRANGE conversation:{id} -limit -1
//!         todo!()
//!     }
//!     // ...
//! }
//! ```

use crate::error::{MemoryError, Result};
use crate::fingerprint::Fingerprint;
use crate::turn::{StateSnapshot, Turn};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Conversation history, response cache and run-state persistence.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Turns of a conversation in append order.
    ///
    /// With `limit`, only the most recent `limit` turns are returned (still
    /// oldest first). Unknown conversations yield an empty history.
    async fn get_history(&self, conversation_id: &str, limit: Option<usize>) -> Result<Vec<Turn>>;

    /// Append a turn, returning it with its assigned sequence number.
    async fn append(&self, conversation_id: &str, turn: Turn) -> Result<Turn> {
        let mut appended = self.append_turns(conversation_id, vec![turn]).await?;
        appended
            .pop()
            .ok_or_else(|| MemoryError::Storage("append returned no turn".into()))
    }

    /// Append several turns as one unit.
    ///
    /// Either every turn is written, contiguously and in order, or none is.
    /// Turns from concurrent calls on the same conversation never interleave.
    async fn append_turns(&self, conversation_id: &str, turns: Vec<Turn>) -> Result<Vec<Turn>>;

    /// Cached value for a fingerprint, if present and not expired.
    async fn get_cached(&self, fingerprint: &Fingerprint) -> Result<Option<Value>>;

    /// Store a value under a fingerprint. `None` means no expiry.
    async fn put_cached(
        &self,
        fingerprint: &Fingerprint,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Persist a run snapshot.
    ///
    /// Replacing a terminal snapshot fails with
    /// [`MemoryError::SnapshotSealed`](crate::MemoryError::SnapshotSealed).
    async fn save_state(&self, snapshot: StateSnapshot) -> Result<()>;

    /// Load a run snapshot by execution id.
    async fn load_state(&self, execution_id: &str) -> Result<Option<StateSnapshot>>;
}
