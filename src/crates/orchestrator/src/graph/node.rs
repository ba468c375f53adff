//! Graph nodes and the fixed transition table.
//!
//! ```text
//! start ─▶ intent_router ─┬─▶ planner ─┐
//!                         │            ▼
//!                         └────▶ llm_agent | external_agent | tool_executor
//!                                      │      (dispatch siblings)
//!                                      ▼
//!                                  grounding ─▶ memory_store ─▶ end
//!
//! any non-terminal node ─▶ failed
//! ```

use capability::CapabilityKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node of the orchestration graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Start,
    IntentRouter,
    Planner,
    LlmAgent,
    ExternalAgent,
    ToolExecutor,
    Grounding,
    MemoryStore,
    End,
    Failed,
}

/// Coarse position of a node in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    IntentRouter,
    Planner,
    Dispatch,
    Grounding,
    MemoryStore,
    End,
    Failed,
}

impl Node {
    pub fn stage(&self) -> Stage {
        match self {
            Node::Start => Stage::Start,
            Node::IntentRouter => Stage::IntentRouter,
            Node::Planner => Stage::Planner,
            Node::LlmAgent | Node::ExternalAgent | Node::ToolExecutor => Stage::Dispatch,
            Node::Grounding => Stage::Grounding,
            Node::MemoryStore => Stage::MemoryStore,
            Node::End => Stage::End,
            Node::Failed => Stage::Failed,
        }
    }

    /// Dispatch node that executes tasks of `kind`.
    ///
    /// Grounding tasks inside a plan are retrieval calls and run under the
    /// tool executor.
    pub fn for_capability(kind: CapabilityKind) -> Node {
        match kind {
            CapabilityKind::Llm => Node::LlmAgent,
            CapabilityKind::Agent => Node::ExternalAgent,
            CapabilityKind::Tool | CapabilityKind::Grounding => Node::ToolExecutor,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Node::End | Node::Failed)
    }

    pub fn is_dispatch(&self) -> bool {
        self.stage() == Stage::Dispatch
    }

    /// The transition table.
    pub fn can_transition_to(&self, next: Node) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Node::Failed {
            return true;
        }
        match self.stage() {
            Stage::Start => next == Node::IntentRouter,
            Stage::IntentRouter => next == Node::Planner || next.is_dispatch(),
            Stage::Planner => next.is_dispatch(),
            Stage::Dispatch => next.is_dispatch() || next == Node::Grounding,
            Stage::Grounding => next == Node::MemoryStore,
            Stage::MemoryStore => next == Node::End,
            Stage::End | Stage::Failed => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Start => "start",
            Node::IntentRouter => "intent_router",
            Node::Planner => "planner",
            Node::LlmAgent => "llm_agent",
            Node::ExternalAgent => "external_agent",
            Node::ToolExecutor => "tool_executor",
            Node::Grounding => "grounding",
            Node::MemoryStore => "memory_store",
            Node::End => "end",
            Node::Failed => "failed",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Start => "start",
            Stage::IntentRouter => "intent_router",
            Stage::Planner => "planner",
            Stage::Dispatch => "dispatch",
            Stage::Grounding => "grounding",
            Stage::MemoryStore => "memory_store",
            Stage::End => "end",
            Stage::Failed => "failed",
        };
        f.write_str(label)
    }
}
