//! Decomposition of multi-step requests into task DAGs
//!
//! Planners are only consulted for `multi_step_plan` requests. A planner
//! either returns a fully validated [`Plan`] or a [`PlanError`]; the graph
//! engine falls back to a single llm task on error.

pub mod capability;
pub mod dag;
pub mod heuristic;

use crate::request::RequestInput;
use crate::router::RoutingDecision;
use async_trait::async_trait;

pub use self::capability::{decomposition_schema, CapabilityPlanner};
pub use dag::{Plan, PlanError, EVIDENCE_KEY};
pub use heuristic::HeuristicPlanner;

/// Turns a request into a task DAG.
#[async_trait]
pub trait Planner: Send + Sync {
    fn name(&self) -> &str;

    async fn plan(&self, input: &RequestInput, decision: &RoutingDecision) -> Result<Plan, PlanError>;
}
