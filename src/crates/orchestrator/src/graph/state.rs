//! Per-execution graph state.
//!
//! A [`GraphState`] is owned by exactly one run. Every mutation goes through
//! a method that refuses to touch a sealed (terminal) state, node moves are
//! checked against [`Node::can_transition_to`], and each results key can be
//! written once.

use crate::executor::TaskResult;
use crate::graph::Node;
use crate::planner::Plan;
use crate::request::{FinalResponse, RequestInput};
use crate::router::RoutingDecision;
use crate::{OrchestratorError, Result, TaskStatus};
use chrono::{DateTime, Utc};
use memory_store::{SnapshotStatus, StateSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a visit to a node went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitOutcome {
    Success,
    /// The node fell back to a default (classification, planning, retrieval)
    Degraded,
    Failed,
    Skipped,
}

/// One entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub node: Node,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub at: DateTime<Utc>,
    pub outcome: VisitOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Last failure seen by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub node: Node,
    pub message: String,
    pub retryable: bool,
}

impl ErrorRecord {
    pub fn new(kind: impl Into<String>, node: Node, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind: kind.into(),
            node,
            message: message.into(),
            retryable,
        }
    }

    pub fn from_error(error: &OrchestratorError, node: Node) -> Self {
        Self::new(error.kind_label(), node, error.to_string(), error.is_retryable())
    }
}

/// State of one end-user turn as it moves through the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub execution_id: String,
    pub conversation_id: String,
    pub input: RequestInput,
    current_node: Node,
    visited: Vec<Visit>,
    #[serde(default)]
    routing_decision: Option<RoutingDecision>,
    #[serde(default)]
    plan: Option<Plan>,
    #[serde(default)]
    results: BTreeMap<String, TaskResult>,
    #[serde(default)]
    error: Option<ErrorRecord>,
    #[serde(default)]
    final_response: Option<FinalResponse>,
    #[serde(default)]
    cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GraphState {
    pub fn new(
        execution_id: impl Into<String>,
        conversation_id: impl Into<String>,
        input: RequestInput,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.into(),
            conversation_id: conversation_id.into(),
            input,
            current_node: Node::Start,
            visited: vec![Visit {
                node: Node::Start,
                task_id: None,
                at: now,
                outcome: VisitOutcome::Success,
                detail: None,
            }],
            routing_decision: None,
            plan: None,
            results: BTreeMap::new(),
            error: None,
            final_response: None,
            cancelled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn current_node(&self) -> Node {
        self.current_node
    }

    pub fn visited(&self) -> &[Visit] {
        &self.visited
    }

    pub fn routing_decision(&self) -> Option<&RoutingDecision> {
        self.routing_decision.as_ref()
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn results(&self) -> &BTreeMap<String, TaskResult> {
        &self.results
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    pub fn final_response(&self) -> Option<&FinalResponse> {
        self.final_response.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Terminal states reject every mutation.
    pub fn is_sealed(&self) -> bool {
        self.current_node.is_terminal()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_sealed() {
            return Err(OrchestratorError::StateSealed(self.execution_id.clone()));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn visit(
        &mut self,
        next: Node,
        task_id: Option<String>,
        outcome: VisitOutcome,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_open()?;
        if !self.current_node.can_transition_to(next) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.current_node.to_string(),
                to: next.to_string(),
            });
        }
        self.current_node = next;
        self.visited.push(Visit {
            node: next,
            task_id,
            at,
            outcome,
            detail,
        });
        self.touch();
        Ok(())
    }

    /// Move to `next`, appending a visit.
    pub fn transition(&mut self, next: Node, outcome: VisitOutcome, detail: Option<String>) -> Result<()> {
        self.visit(next, None, outcome, detail, Utc::now())
    }

    /// Record a settled task under its dispatch node, stamped with the
    /// time the task settled.
    pub fn record_task(
        &mut self,
        node: Node,
        task_id: impl Into<String>,
        outcome: VisitOutcome,
        detail: Option<String>,
        settled_at: DateTime<Utc>,
    ) -> Result<()> {
        self.visit(node, Some(task_id.into()), outcome, detail, settled_at)
    }

    pub fn set_routing_decision(&mut self, decision: RoutingDecision) -> Result<()> {
        self.ensure_open()?;
        self.routing_decision = Some(decision);
        self.touch();
        Ok(())
    }

    pub fn set_plan(&mut self, plan: Plan) -> Result<()> {
        self.ensure_open()?;
        self.plan = Some(plan);
        self.touch();
        Ok(())
    }

    pub fn set_task_status(&mut self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.ensure_open()?;
        let plan = self
            .plan
            .as_mut()
            .ok_or_else(|| OrchestratorError::General("no plan recorded".into()))?;
        plan.set_status(task_id, status)?;
        self.touch();
        Ok(())
    }

    /// Write a results entry. Each key can be written once.
    pub fn record_result(&mut self, key: impl Into<String>, result: TaskResult) -> Result<()> {
        self.ensure_open()?;
        let key = key.into();
        if self.results.contains_key(&key) {
            return Err(OrchestratorError::ResultAlreadyRecorded(key));
        }
        self.results.insert(key, result);
        self.touch();
        Ok(())
    }

    pub fn set_cancelled(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.cancelled = true;
        self.touch();
        Ok(())
    }

    /// Remember a failure that the run absorbed.
    pub fn note_error(&mut self, record: ErrorRecord) -> Result<()> {
        self.ensure_open()?;
        self.error = Some(record);
        self.touch();
        Ok(())
    }

    /// Finish successfully: store the response and move to `end`.
    pub fn complete(&mut self, response: FinalResponse) -> Result<()> {
        self.ensure_open()?;
        if !self.current_node.can_transition_to(Node::End) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.current_node.to_string(),
                to: Node::End.to_string(),
            });
        }
        self.final_response = Some(response);
        self.visit(Node::End, None, VisitOutcome::Success, None, Utc::now())
    }

    /// Finish with a failure and move to `failed`.
    pub fn fail(&mut self, record: ErrorRecord) -> Result<()> {
        self.ensure_open()?;
        let detail = Some(record.kind.clone());
        self.error = Some(record);
        self.final_response = None;
        self.visit(Node::Failed, None, VisitOutcome::Failed, detail, Utc::now())
    }

    /// Snapshot for the memory store. Failed runs keep only the error record
    /// and the audit trail.
    pub fn to_snapshot(&self, status: SnapshotStatus) -> Result<StateSnapshot> {
        let value = if status == SnapshotStatus::Failed {
            let mut trimmed = self.clone();
            trimmed.results.clear();
            trimmed.final_response = None;
            serde_json::to_value(&trimmed)?
        } else {
            serde_json::to_value(self)?
        };
        Ok(StateSnapshot::new(
            self.execution_id.clone(),
            self.conversation_id.clone(),
            status,
            value,
        ))
    }

    pub fn from_snapshot(snapshot: &StateSnapshot) -> Result<Self> {
        Ok(serde_json::from_value(snapshot.state.clone())?)
    }
}
