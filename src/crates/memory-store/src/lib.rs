//! Conversation memory, response cache and run-state persistence.
//!
//! The orchestrator talks to storage only through the [`MemoryStore`] trait.
//! [`InMemoryStore`] is the bundled implementation; durable backends implement
//! the same trait.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use memory_store::{Fingerprint, InMemoryStore, MemoryStore, Turn};
//! use std::time::Duration;
//!
//! let store = InMemoryStore::new();
//! store.append("conv-1", Turn::user("What is Rust?")).await?;
//!
//! let fp = Fingerprint::exact(&["llm", "What is Rust?"]);
//! store.put_cached(&fp, serde_json::json!("A systems language"), Some(Duration::from_secs(300))).await?;
//! ```

pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod traits;
pub mod turn;

pub use error::{MemoryError, Result};
pub use fingerprint::{normalize, Fingerprint};
pub use memory::InMemoryStore;
pub use traits::MemoryStore;
pub use turn::{SnapshotStatus, StateSnapshot, Turn, TurnRole};
