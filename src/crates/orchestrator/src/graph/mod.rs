//! Orchestration graph
//!
//! [`GraphEngine`] drives a [`GraphState`] through the fixed [`Node`] table.

pub mod engine;
pub mod node;
pub mod state;

pub use engine::GraphEngine;
pub use node::{Node, Stage};
pub use state::{ErrorRecord, GraphState, Visit, VisitOutcome};
