//! Graph engine
//!
//! Owns one [`GraphState`] per run and drives it through the node table:
//! classification, optional planning, dispatch, grounding and memory
//! write-back. Recoverable failures are absorbed and recorded in the audit
//! trail; only run-level failures reach the caller, as a [`RunError`].

use crate::config::{EngineConfig, PlannerKind};
use crate::executor::{retry_store_write, DispatchReport, Dispatcher, StoreWrite};
use crate::graph::state::{ErrorRecord, GraphState, VisitOutcome};
use crate::graph::Node;
use crate::grounding::{evidence_from_results, Fuser};
use crate::planner::{CapabilityPlanner, HeuristicPlanner, Plan, Planner, EVIDENCE_KEY};
use crate::request::{FinalResponse, OrchestrationRequest, OrchestrationResponse, RequestInput, RunError};
use crate::router::{ClassifierRouter, IntentRouter, RoutingDecision, RoutingProfile, RuleRouter};
use crate::{OrchestratorError, Result, Task, TaskStatus};
use capability::{CapabilityKind, CapabilityRegistry};
use dashmap::DashMap;
use memory_store::{MemoryStore, SnapshotStatus, Turn};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Execution ids with a run in progress.
#[derive(Default)]
struct InFlight {
    ids: DashMap<String, ()>,
}

/// Exclusive ownership of an execution id; released on drop.
struct Lease<'a> {
    registry: &'a InFlight,
    execution_id: String,
}

impl InFlight {
    fn acquire(&self, execution_id: &str) -> Option<Lease<'_>> {
        match self.ids.entry(execution_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(Lease {
                    registry: self,
                    execution_id: execution_id.to_string(),
                })
            }
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.registry.ids.remove(&self.execution_id);
    }
}

/// Routes end-user turns through the orchestration graph.
pub struct GraphEngine {
    config: EngineConfig,
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn MemoryStore>,
    router: Arc<dyn IntentRouter>,
    planner: Arc<dyn Planner>,
    dispatcher: Dispatcher,
    fuser: Fuser,
    in_flight: InFlight,
}

impl GraphEngine {
    /// Build an engine from validated configuration.
    pub fn new(
        config: EngineConfig,
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn MemoryStore>,
    ) -> Result<Self> {
        config.validate()?;

        let rules = RuleRouter::new(config.router.clone())?;
        let router: Arc<dyn IntentRouter> = match &config.router.classifier {
            Some(classifier) => Arc::new(ClassifierRouter::new(
                Arc::clone(&registry),
                classifier.clone(),
                RuleRouter::new(config.router.clone())?,
            )),
            None => Arc::new(RuleRouter::new(config.router.clone())?),
        };

        let planner: Arc<dyn Planner> = match config.planner.kind {
            PlannerKind::Heuristic => {
                Arc::new(HeuristicPlanner::new(Arc::new(rules), config.planner.max_tasks)?)
            }
            PlannerKind::Capability => Arc::new(CapabilityPlanner::new(
                Arc::clone(&registry),
                config.planner.target.clone(),
                config.planner.timeout(),
                config.planner.max_tasks,
            )?),
        };

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.dispatch.clone(),
        )?;
        let fuser = config.grounding.fuser();

        info!(
            router = router.version(),
            planner = planner.name(),
            clients = registry.len(),
            "Graph engine ready"
        );

        Ok(Self {
            config,
            registry,
            store,
            router,
            planner,
            dispatcher,
            fuser,
            in_flight: InFlight::default(),
        })
    }

    /// Replace the intent router.
    pub fn with_router(mut self, router: Arc<dyn IntentRouter>) -> Self {
        self.router = router;
        self
    }

    /// Replace the planner.
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Classify without running anything.
    pub async fn classify(&self, input: &RequestInput) -> RoutingDecision {
        self.router.classify(input).await
    }

    /// Run one request to completion.
    pub async fn run(&self, request: OrchestrationRequest) -> OrchestrationResponse {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    /// Run one request; cancelling `cancel` skips outstanding tasks and
    /// finishes with whatever is done.
    pub async fn run_with_cancel(
        &self,
        request: OrchestrationRequest,
        cancel: CancellationToken,
    ) -> OrchestrationResponse {
        let execution_id = request
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let Some(_lease) = self.in_flight.acquire(&execution_id) else {
            warn!(execution_id = %execution_id, "Rejecting concurrent run for execution id");
            let error = OrchestratorError::ExecutionInFlight(execution_id.clone());
            return OrchestrationResponse {
                outcome: Err(RunError {
                    execution_id: execution_id.clone(),
                    message: error.user_message().to_string(),
                }),
                execution_id,
                conversation_id,
            };
        };

        if let Some(replayed) = self.replay(&execution_id).await {
            return replayed;
        }

        let span = info_span!(
            "orchestration",
            execution_id = %execution_id,
            conversation_id = %conversation_id,
            user_id = %request.user_id,
        );
        let mut state = GraphState::new(execution_id.clone(), conversation_id.clone(), request.input());
        let outcome = self.execute(&mut state, cancel).instrument(span).await;

        OrchestrationResponse {
            execution_id,
            conversation_id,
            outcome,
        }
    }

    /// Answer from a terminal snapshot, if one exists.
    async fn replay(&self, execution_id: &str) -> Option<OrchestrationResponse> {
        let snapshot = match self.store.load_state(execution_id).await {
            Ok(Some(snapshot)) if snapshot.is_terminal() => snapshot,
            Ok(Some(_)) => {
                debug!(execution_id, "Found unfinished snapshot, executing again");
                return None;
            }
            Ok(None) => return None,
            Err(e) => {
                warn!(execution_id, error = %e, "Snapshot lookup failed, executing");
                return None;
            }
        };

        let state = match GraphState::from_snapshot(&snapshot) {
            Ok(state) => state,
            Err(e) => {
                warn!(execution_id, error = %e, "Unreadable snapshot, executing");
                return None;
            }
        };

        info!(execution_id, status = ?snapshot.status, "Replaying stored outcome");
        let outcome = match state.final_response() {
            Some(response) => {
                let mut response = response.clone();
                response.replayed = true;
                Ok(response)
            }
            None => {
                let kind = state.error().map(|e| e.kind.as_str()).unwrap_or_default();
                Err(RunError {
                    execution_id: execution_id.to_string(),
                    message: OrchestratorError::user_message_for(kind).to_string(),
                })
            }
        };

        Some(OrchestrationResponse {
            execution_id: execution_id.to_string(),
            conversation_id: state.conversation_id.clone(),
            outcome,
        })
    }

    async fn execute(
        &self,
        state: &mut GraphState,
        cancel: CancellationToken,
    ) -> std::result::Result<FinalResponse, RunError> {
        let run_token = cancel.child_token();
        let _timer = self.arm_run_timeout(&run_token);

        match self.drive(state, &run_token).await {
            Ok(response) => {
                let status = if response.cancelled {
                    SnapshotStatus::Cancelled
                } else {
                    SnapshotStatus::Completed
                };
                self.persist(state, status).await;
                info!(
                    partial = response.is_partial(),
                    cancelled = response.cancelled,
                    "Run completed"
                );
                Ok(response)
            }
            Err(error) => {
                let node = state.current_node();
                warn!(node = %node, kind = error.kind_label(), error = %error, "Run failed");
                if let Err(e) = state.fail(ErrorRecord::from_error(&error, node)) {
                    warn!(error = %e, "Could not record failure in state");
                }
                self.persist(state, SnapshotStatus::Failed).await;
                Err(RunError {
                    execution_id: state.execution_id.clone(),
                    message: error.user_message().to_string(),
                })
            }
        }
    }

    /// Trip `token` once the run deadline passes. The timer stops when the
    /// returned guard is dropped.
    fn arm_run_timeout(&self, token: &CancellationToken) -> Option<tokio_util::sync::DropGuard> {
        let timeout = self.config.run_timeout()?;
        let finished = CancellationToken::new();
        let run = token.clone();
        let stop = finished.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Run timeout reached, cancelling");
                    run.cancel();
                }
                _ = stop.cancelled() => {}
                _ = run.cancelled() => {}
            }
        });
        Some(finished.drop_guard())
    }

    async fn drive(&self, state: &mut GraphState, cancel: &CancellationToken) -> Result<FinalResponse> {
        let execution_id = state.execution_id.clone();

        let decision = self.router.classify(&state.input).await;
        if decision.degraded {
            warn!(
                profile = %decision.profile,
                reason = decision.reason.as_deref().unwrap_or(""),
                "Intent classification degraded"
            );
            state.transition(Node::IntentRouter, VisitOutcome::Degraded, decision.reason.clone())?;
        } else {
            state.transition(
                Node::IntentRouter,
                VisitOutcome::Success,
                Some(decision.profile.to_string()),
            )?;
        }
        state.set_routing_decision(decision.clone())?;

        let (plan, profile) = self.plan_for(state, &decision).await?;
        state.set_plan(plan.clone())?;

        let context = self.base_context(state).await;
        let report = self
            .dispatcher
            .dispatch(&execution_id, &plan, &context, cancel)
            .await;
        self.apply_report(state, &report)?;

        if report.cancelled {
            state.set_cancelled()?;
        }
        if report.done_count() == 0 {
            return Err(if report.cancelled {
                OrchestratorError::NoUsableResults(execution_id)
            } else {
                OrchestratorError::AllTasksFailed {
                    execution_id,
                    failures: report.failures(),
                }
            });
        }

        let retrieval = self.retrieve_evidence(state, &plan, &context, cancel).await?;
        let evidence = evidence_from_results(state.results());
        let answer = self
            .fuser
            .fuse(&plan.ids(), state.results(), evidence)
            .ok_or_else(|| OrchestratorError::NoUsableResults(state.execution_id.clone()))?;
        state.transition(Node::Grounding, retrieval.0, retrieval.1)?;

        let response = FinalResponse {
            answer,
            profile,
            cancelled: state.is_cancelled(),
            replayed: false,
        };

        let write_back = self.write_back(state, &response).await;
        state.transition(Node::MemoryStore, write_back.0, write_back.1)?;
        self.persist(state, SnapshotStatus::InProgress).await;

        state.complete(response.clone())?;
        Ok(response)
    }

    /// Plan for the decision's profile, returning the profile actually run.
    /// Planner failure falls back to a single llm task over the prompt.
    async fn plan_for(
        &self,
        state: &mut GraphState,
        decision: &RoutingDecision,
    ) -> Result<(Plan, RoutingProfile)> {
        if let Some(kind) = decision.profile.implied_capability() {
            let mut task = Task::new("t1", kind, state.input.prompt.clone());
            task.target = decision.target.clone();
            return Ok((Plan::single(task), decision.profile));
        }

        match self.planner.plan(&state.input, decision).await {
            Ok(plan) => {
                info!(planner = self.planner.name(), tasks = plan.len(), "Plan ready");
                state.transition(
                    Node::Planner,
                    VisitOutcome::Success,
                    Some(format!("{} tasks", plan.len())),
                )?;
                Ok((plan, decision.profile))
            }
            Err(e) => {
                warn!(planner = self.planner.name(), error = %e, "Planning failed, falling back to a direct answer");
                state.transition(
                    Node::Planner,
                    VisitOutcome::Degraded,
                    Some(format!("fallback to {}: {}", RoutingProfile::DirectLlm, e)),
                )?;
                state.note_error(ErrorRecord::from_error(
                    &OrchestratorError::PlanInvalid(e),
                    Node::Planner,
                ))?;
                Ok((Plan::direct(state.input.prompt.clone()), RoutingProfile::DirectLlm))
            }
        }
    }

    /// Context handed to every task: caller metadata and recent history.
    async fn base_context(&self, state: &GraphState) -> Map<String, Value> {
        let mut context = Map::new();
        if !state.input.metadata.is_empty() {
            context.insert("metadata".into(), Value::Object(state.input.metadata.clone()));
        }

        let window = self.config.memory.history_window;
        if window == 0 {
            return context;
        }
        match self.store.get_history(&state.conversation_id, Some(window)).await {
            Ok(turns) if !turns.is_empty() => {
                let history: Vec<Value> = turns
                    .iter()
                    .map(|t| json!({ "role": t.role, "content": t.content }))
                    .collect();
                context.insert("history".into(), Value::Array(history));
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not load conversation history"),
        }
        context
    }

    /// Record settled tasks in completion order.
    fn apply_report(&self, state: &mut GraphState, report: &DispatchReport) -> Result<()> {
        for completion in &report.completions {
            let node = Node::for_capability(completion.capability);
            let id = completion.task_id.as_str();
            match completion.status {
                TaskStatus::Done => {
                    state.set_task_status(id, TaskStatus::Running)?;
                    state.set_task_status(id, TaskStatus::Done)?;
                    if let Some(result) = &completion.result {
                        state.record_result(id, result.clone())?;
                    }
                    state.record_task(node, id, VisitOutcome::Success, None, completion.settled_at)?;
                }
                TaskStatus::Failed => {
                    state.set_task_status(id, TaskStatus::Running)?;
                    state.set_task_status(id, TaskStatus::Failed)?;
                    let detail = completion.failure.as_ref().map(|f| f.kind.clone());
                    state.record_task(node, id, VisitOutcome::Failed, detail, completion.settled_at)?;
                }
                TaskStatus::Skipped => {
                    state.set_task_status(id, TaskStatus::Skipped)?;
                    let detail = completion.failure.as_ref().map(|f| f.kind.clone());
                    state.record_task(node, id, VisitOutcome::Skipped, detail, completion.settled_at)?;
                }
                TaskStatus::Pending | TaskStatus::Running => {
                    debug!(task_id = id, status = %completion.status, "Ignoring unsettled completion");
                }
            }
        }
        Ok(())
    }

    /// Fetch evidence through the grounding client before fusion.
    async fn retrieve_evidence(
        &self,
        state: &mut GraphState,
        plan: &Plan,
        context: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<(VisitOutcome, Option<String>)> {
        let grounding = &self.config.grounding;
        if !grounding.retrieve_evidence
            || state.is_cancelled()
            || plan.has_capability(CapabilityKind::Grounding)
            || !self.registry.has_kind(CapabilityKind::Grounding)
        {
            return Ok((VisitOutcome::Success, None));
        }

        let mut task = Task::new(EVIDENCE_KEY, CapabilityKind::Grounding, state.input.prompt.clone());
        task.target = grounding.target.clone();

        match self
            .dispatcher
            .execute_task(&state.execution_id, &task, context.clone(), cancel)
            .await
        {
            Ok(result) => {
                debug!(sources = result.output.sources.len(), "Evidence retrieved");
                state.record_result(EVIDENCE_KEY, result)?;
                Ok((VisitOutcome::Success, Some(EVIDENCE_KEY.to_string())))
            }
            Err(failure) => {
                warn!(kind = %failure.kind, message = %failure.message, "Evidence retrieval failed, fusing without it");
                state.note_error(ErrorRecord::new(
                    failure.kind.clone(),
                    Node::Grounding,
                    failure.message,
                    failure.retryable,
                ))?;
                Ok((VisitOutcome::Degraded, Some(failure.kind)))
            }
        }
    }

    /// Append the user and assistant turns as one exchange. Failure never
    /// fails the run and leaves the conversation untouched.
    async fn write_back(
        &self,
        state: &mut GraphState,
        response: &FinalResponse,
    ) -> (VisitOutcome, Option<String>) {
        let execution_id = state.execution_id.clone();
        let conversation_id = state.conversation_id.clone();
        let exchange = vec![
            Turn::user(state.input.prompt.clone())
                .with_execution(execution_id.clone())
                .with_metadata("user_id", Value::String(state.input.user_id.clone())),
            Turn::assistant(response.text())
                .with_execution(execution_id)
                .with_metadata("profile", Value::String(response.profile.to_string()))
                .with_metadata("partial", Value::Bool(response.is_partial())),
        ];

        let conversation_id = conversation_id.as_str();
        let write = StoreWrite::new("conversation_turns", conversation_id);
        let appended = retry_store_write(&self.config.memory.write_back, write, || {
            let exchange = exchange.clone();
            async move {
                self.store
                    .append_turns(conversation_id, exchange)
                    .await
                    .map_err(OrchestratorError::from)
            }
        })
        .await;

        match appended {
            Ok(_) => (VisitOutcome::Success, None),
            Err(e) => {
                warn!(error = %e, "Conversation write-back failed; response is still returned");
                let record = ErrorRecord::from_error(&e, Node::MemoryStore);
                if let Err(e) = state.note_error(record) {
                    warn!(error = %e, "Could not record write-back failure");
                }
                (VisitOutcome::Degraded, Some(e.kind_label().to_string()))
            }
        }
    }

    /// Save a snapshot. Failures are logged only.
    async fn persist(&self, state: &GraphState, status: SnapshotStatus) {
        let snapshot = match state.to_snapshot(status) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Could not build state snapshot");
                return;
            }
        };
        let write = StoreWrite::new("state_snapshot", &state.execution_id);
        let saved = retry_store_write(&self.config.memory.write_back, write, || {
            let snapshot = snapshot.clone();
            async move {
                self.store
                    .save_state(snapshot)
                    .await
                    .map_err(OrchestratorError::from)
            }
        })
        .await;
        if let Err(e) = saved {
            warn!(status = ?status, error = %e, "Snapshot save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::OrchestrationRequest;
    use capability::testing::{ScriptStep, ScriptedClient};
    use capability::EchoClient;
    use memory_store::InMemoryStore;

    fn engine_with(clients: Vec<Arc<dyn capability::CapabilityClient>>) -> (GraphEngine, Arc<InMemoryStore>) {
        let mut builder = CapabilityRegistry::builder();
        for client in clients {
            builder = builder.register(client);
        }
        let registry = Arc::new(builder.build().unwrap());
        let store = Arc::new(InMemoryStore::new());
        let engine = GraphEngine::new(EngineConfig::default(), registry, store.clone()).unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn test_direct_run_reaches_end() {
        let (engine, store) = engine_with(vec![Arc::new(EchoClient::new("echo", CapabilityKind::Llm))]);

        let response = engine
            .run(OrchestrationRequest::new("What is Rust?", "u1").with_execution_id("exec-1"))
            .await;
        let answer = response.final_response().unwrap();
        assert_eq!(answer.profile, RoutingProfile::DirectLlm);
        assert!(!answer.replayed);

        let snapshot = store.load_state("exec-1").await.unwrap().unwrap();
        assert_eq!(snapshot.status, SnapshotStatus::Completed);
        let state = GraphState::from_snapshot(&snapshot).unwrap();
        let nodes: Vec<Node> = state.visited().iter().map(|v| v.node).collect();
        assert_eq!(
            nodes,
            vec![
                Node::Start,
                Node::IntentRouter,
                Node::LlmAgent,
                Node::Grounding,
                Node::MemoryStore,
                Node::End
            ]
        );
        assert_eq!(store.get_history(&response.conversation_id, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_lease_is_exclusive() {
        let inflight = InFlight::default();
        let lease = inflight.acquire("exec-1");
        assert!(lease.is_some());
        assert!(inflight.acquire("exec-1").is_none());
        assert!(inflight.acquire("exec-2").is_some());
        drop(lease);
        assert!(inflight.acquire("exec-1").is_some());
    }

    #[tokio::test]
    async fn test_failed_run_stores_error_only_snapshot() {
        let client = ScriptedClient::new("down", CapabilityKind::Llm)
            .otherwise(ScriptStep::fail("bad request", false));
        let (engine, store) = engine_with(vec![Arc::new(client)]);

        let response = engine
            .run(OrchestrationRequest::new("Explain tides", "u1").with_execution_id("exec-f"))
            .await;
        let error = response.error().unwrap();
        assert_eq!(error.message, "all capability calls failed");
        assert!(!error.message.contains("bad request"));

        let snapshot = store.load_state("exec-f").await.unwrap().unwrap();
        assert_eq!(snapshot.status, SnapshotStatus::Failed);
        let state = GraphState::from_snapshot(&snapshot).unwrap();
        assert_eq!(state.current_node(), Node::Failed);
        assert!(state.results().is_empty());
        assert_eq!(state.error().unwrap().kind, "all_tasks_failed");
        assert!(store.get_history(&response.conversation_id, None).await.unwrap().is_empty());
    }
}
