//! Execution dispatcher
//!
//! Runs the tasks of a [`Plan`] against their capability clients:
//!
//! - each call has its own timeout; timeouts and retryable failures are
//!   retried with the configured backoff, permanent failures are fatal
//! - a timed-out attempt keeps running while the task retries, and whichever
//!   attempt succeeds first is committed through the [`AttemptLedger`]
//! - independent tasks run concurrently up to `max_concurrency`; a task runs
//!   once all of its dependencies are done, and a failed or skipped task
//!   skips everything downstream of it
//! - llm and grounding answers are cached by request fingerprint

use crate::executor::ledger::AttemptLedger;
use crate::executor::retry::{classify_capability_error, ErrorClass, RetryConfig};
use crate::planner::Plan;
use crate::{OrchestratorError, Result, Task, TaskStatus};
use capability::{CapabilityClient, CapabilityError, CapabilityKind, CapabilityOutput, CapabilityRegistry, CapabilityRequest};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use memory_store::{Fingerprint, MemoryStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Context key under which a dependent task receives its dependencies' outputs.
pub const DEPENDENCIES_KEY: &str = "dependencies";

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry lifetime; `None` keeps entries until evicted by the store
    pub ttl_ms: Option<u64>,
    /// Capability kinds whose answers may be cached
    pub kinds: Vec<CapabilityKind>,
    /// Key on normalized prompt text instead of the exact prompt
    pub normalized: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: Some(300_000),
            kinds: vec![CapabilityKind::Llm, CapabilityKind::Grounding],
            normalized: false,
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-attempt timeout in milliseconds
    pub call_timeout_ms: u64,
    pub retry: RetryConfig,
    /// Maximum number of tasks running at once
    pub max_concurrency: usize,
    pub cache: CacheConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            retry: RetryConfig::default(),
            max_concurrency: 4,
            cache: CacheConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.call_timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "dispatch.call_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(OrchestratorError::Config(
                "dispatch.max_concurrency must be at least 1".into(),
            ));
        }
        if self.cache.kinds.iter().any(|k| matches!(k, CapabilityKind::Agent | CapabilityKind::Tool)) {
            return Err(OrchestratorError::Config(
                "agent and tool answers cannot be cached".into(),
            ));
        }
        self.retry.validate()
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Committed output of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub capability: CapabilityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub output: CapabilityOutput,
    /// Attempts launched before the task settled (0 for a cache hit)
    pub attempts: u32,
    /// Attempt that committed the output
    pub attempt_id: String,
    #[serde(default)]
    pub cached: bool,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn content(&self) -> &str {
        &self.output.content
    }
}

/// Why a task did not produce a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: String,
    /// Machine-readable failure kind
    pub kind: String,
    pub message: String,
    pub retryable: bool,
    pub attempts: u32,
    /// Set when the task was stopped by run cancellation
    #[serde(default)]
    pub cancelled: bool,
}

impl TaskFailure {
    fn from_capability(task_id: &str, error: &CapabilityError, attempts: u32) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind: error.kind_label().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            attempts,
            cancelled: false,
        }
    }

    fn cancelled(task_id: &str, attempts: u32) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind: "cancelled".into(),
            message: "run cancelled before the task completed".into(),
            retryable: false,
            attempts,
            cancelled: true,
        }
    }

    fn upstream(task_id: &str, dependency: &str, cancelled: bool) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind: "dependency_not_done".into(),
            message: format!("dependency '{}' did not complete", dependency),
            retryable: false,
            attempts: 0,
            cancelled,
        }
    }
}

/// Final state of one task, in the order tasks settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub task_id: String,
    pub capability: CapabilityKind,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    /// When the task reached its terminal status
    pub settled_at: DateTime<Utc>,
}

/// Outcome of dispatching a whole plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub completions: Vec<TaskCompletion>,
    pub cancelled: bool,
    pub discarded_duplicates: usize,
}

impl DispatchReport {
    pub fn done_count(&self) -> usize {
        self.completions
            .iter()
            .filter(|c| c.status == TaskStatus::Done)
            .count()
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.completions
            .iter()
            .find(|c| c.task_id == task_id)
            .map(|c| c.status)
    }

    /// Failures of tasks that actually ran and failed.
    pub fn failures(&self) -> Vec<TaskFailure> {
        self.completions
            .iter()
            .filter(|c| c.status == TaskStatus::Failed)
            .filter_map(|c| c.failure.clone())
            .collect()
    }
}

enum AttemptReport {
    Committed {
        attempt_id: String,
        output: CapabilityOutput,
    },
    Failed {
        attempt_id: String,
        error: CapabilityError,
    },
}

enum Settled {
    Success { attempt_id: String, output: CapabilityOutput },
    Failure(CapabilityError),
    Cancelled,
}

/// Runs tasks against the capability registry.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn MemoryStore>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn MemoryStore>,
        config: DispatchConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            store,
            config,
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn cache_key(&self, request: &CapabilityRequest) -> Option<Fingerprint> {
        let cache = &self.config.cache;
        if !cache.enabled || !cache.kinds.contains(&request.kind) {
            return None;
        }

        let context = Value::Object(request.context.clone()).to_string();
        let target = request.target.as_deref().unwrap_or("");
        let fingerprint = if cache.normalized {
            Fingerprint::normalized(&[request.kind.as_str(), target, context.as_str()], &request.prompt)
        } else {
            Fingerprint::exact(&[request.kind.as_str(), target, request.prompt.as_str(), context.as_str()])
        };
        Some(fingerprint)
    }

    async fn cached_output(&self, fingerprint: &Fingerprint) -> Option<CapabilityOutput> {
        match self.store.get_cached(fingerprint).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(output) => Some(output),
                Err(e) => {
                    warn!(fingerprint = %fingerprint, error = %e, "Ignoring unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    async fn store_output(&self, fingerprint: &Fingerprint, output: &CapabilityOutput) {
        let value = match serde_json::to_value(output) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Could not serialize output for caching");
                return;
            }
        };
        let ttl = self.config.cache.ttl_ms.map(Duration::from_millis);
        if let Err(e) = self.store.put_cached(fingerprint, value, ttl).await {
            warn!(fingerprint = %fingerprint, error = %e, "Cache write failed");
        }
    }

    /// Execute one task with timeout, retry and caching.
    pub async fn execute_task(
        &self,
        execution_id: &str,
        task: &Task,
        context: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> std::result::Result<TaskResult, TaskFailure> {
        let ledger = Arc::new(AttemptLedger::new());
        self.execute_with_ledger(execution_id, task, context, cancel, &ledger)
            .await
    }

    async fn execute_with_ledger(
        &self,
        execution_id: &str,
        task: &Task,
        context: Map<String, Value>,
        cancel: &CancellationToken,
        ledger: &Arc<AttemptLedger>,
    ) -> std::result::Result<TaskResult, TaskFailure> {
        if cancel.is_cancelled() {
            return Err(TaskFailure::cancelled(&task.id, 0));
        }

        let mut request = CapabilityRequest::new(task.capability, task.input.clone());
        request.target = task.target.clone();
        request.context = context;

        let fingerprint = self.cache_key(&request);
        if let Some(fingerprint) = &fingerprint {
            if let Some(output) = self.cached_output(fingerprint).await {
                debug!(execution_id, task_id = %task.id, "Cache hit");
                return Ok(self.task_result(task, output, 0, format!("{}#cache", task.id), true));
            }
        }

        let client = self
            .registry
            .resolve(task.capability, task.target.as_deref())
            .map_err(|e| TaskFailure::from_capability(&task.id, &e, 0))?;

        let (settled, attempts) = self
            .run_attempts(execution_id, task, client, Arc::new(request), cancel, ledger)
            .await;

        match settled {
            Settled::Success { attempt_id, output } => {
                info!(execution_id, task_id = %task.id, attempt_id = %attempt_id, attempts, "Task done");
                if let Some(fingerprint) = &fingerprint {
                    self.store_output(fingerprint, &output).await;
                }
                Ok(self.task_result(task, output, attempts, attempt_id, false))
            }
            Settled::Failure(error) => {
                warn!(execution_id, task_id = %task.id, attempts, error = %error, "Task failed");
                Err(TaskFailure::from_capability(&task.id, &error, attempts))
            }
            Settled::Cancelled => {
                info!(execution_id, task_id = %task.id, attempts, "Task cancelled");
                Err(TaskFailure::cancelled(&task.id, attempts))
            }
        }
    }

    fn task_result(
        &self,
        task: &Task,
        output: CapabilityOutput,
        attempts: u32,
        attempt_id: String,
        cached: bool,
    ) -> TaskResult {
        TaskResult {
            task_id: task.id.clone(),
            capability: task.capability,
            target: task.target.clone(),
            output,
            attempts,
            attempt_id,
            cached,
            completed_at: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_attempt(
        &self,
        client: Arc<dyn CapabilityClient>,
        request: Arc<CapabilityRequest>,
        task_id: String,
        attempt_id: String,
        ledger: Arc<AttemptLedger>,
        reports: mpsc::UnboundedSender<AttemptReport>,
        token: CancellationToken,
    ) {
        let timeout = self.config.call_timeout();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = client.invoke(&request, timeout) => result,
            };
            // A closed channel means the task already settled.
            match result {
                Ok(output) => {
                    if ledger.try_commit(&task_id, &attempt_id) {
                        let _ = reports.send(AttemptReport::Committed { attempt_id, output });
                    }
                }
                Err(error) => {
                    let _ = reports.send(AttemptReport::Failed { attempt_id, error });
                }
            }
        });
    }

    async fn run_attempts(
        &self,
        execution_id: &str,
        task: &Task,
        client: Arc<dyn CapabilityClient>,
        request: Arc<CapabilityRequest>,
        cancel: &CancellationToken,
        ledger: &Arc<AttemptLedger>,
    ) -> (Settled, u32) {
        let retry = &self.config.retry;
        let timeout = self.config.call_timeout();
        let max_attempts = retry.max_retries + 1;
        let attempts_token = cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();
        ledger.open(&task.id);

        let mut attempt: u32 = 0;
        let settled = 'attempts: loop {
            attempt += 1;
            let current = format!("{}#{}", task.id, attempt);
            debug!(execution_id, task_id = %task.id, attempt, attempt_id = %current, "Starting attempt");
            self.spawn_attempt(
                Arc::clone(&client),
                Arc::clone(&request),
                task.id.clone(),
                current.clone(),
                Arc::clone(ledger),
                tx.clone(),
                attempts_token.clone(),
            );

            let deadline = Instant::now() + timeout;
            let error = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'attempts Settled::Cancelled,
                    _ = sleep_until(deadline) => {
                        warn!(execution_id, task_id = %task.id, attempt, timeout_ms = self.config.call_timeout_ms, "Attempt timed out");
                        break CapabilityError::Timeout {
                            capability: request.label(),
                            timeout,
                        };
                    }
                    report = rx.recv() => match report {
                        Some(AttemptReport::Committed { attempt_id, output }) => {
                            break 'attempts Settled::Success { attempt_id, output };
                        }
                        Some(AttemptReport::Failed { attempt_id, error }) if attempt_id == current => {
                            break error;
                        }
                        Some(AttemptReport::Failed { attempt_id, error }) => {
                            debug!(execution_id, attempt_id = %attempt_id, error = %error, "Earlier attempt failed after its timeout");
                        }
                        None => {}
                    },
                }
            };

            if classify_capability_error(&error) == ErrorClass::Permanent {
                break 'attempts Settled::Failure(error);
            }
            if attempt >= max_attempts {
                break 'attempts Settled::Failure(error);
            }

            let delay = retry.backoff_delay(attempt - 1);
            warn!(
                execution_id,
                task_id = %task.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying task after backoff"
            );

            // Earlier attempts may still answer while we wait.
            let wake = Instant::now() + delay;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'attempts Settled::Cancelled,
                    _ = sleep_until(wake) => break,
                    report = rx.recv() => match report {
                        Some(AttemptReport::Committed { attempt_id, output }) => {
                            break 'attempts Settled::Success { attempt_id, output };
                        }
                        Some(AttemptReport::Failed { attempt_id, error }) => {
                            debug!(execution_id, attempt_id = %attempt_id, error = %error, "Earlier attempt failed during backoff");
                        }
                        None => {}
                    },
                }
            }
        };

        let settled = match settled {
            success @ Settled::Success { .. } => success,
            other => match ledger.seal(&task.id) {
                // An attempt committed between the decision and the seal; its
                // report is already on its way.
                Some(winner) => loop {
                    match rx.recv().await {
                        Some(AttemptReport::Committed { attempt_id, output }) if attempt_id == winner => {
                            break Settled::Success { attempt_id, output };
                        }
                        Some(_) => continue,
                        None => break other,
                    }
                },
                None => other,
            },
        };

        attempts_token.cancel();
        (settled, attempt)
    }

    async fn run_one(
        &self,
        execution_id: &str,
        task: &Task,
        context: Map<String, Value>,
        cancel: &CancellationToken,
        ledger: &Arc<AttemptLedger>,
        semaphore: &Arc<Semaphore>,
    ) -> (String, std::result::Result<TaskResult, TaskFailure>) {
        let _permit = tokio::select! {
            permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
            _ = cancel.cancelled() => None,
        };
        let outcome = self
            .execute_with_ledger(execution_id, task, context, cancel, ledger)
            .await;
        (task.id.clone(), outcome)
    }

    /// Run every task of `plan`, honouring dependencies and cancellation.
    ///
    /// Completions are reported in the order tasks settled.
    pub async fn dispatch(
        &self,
        execution_id: &str,
        plan: &Plan,
        base_context: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> DispatchReport {
        let ledger = Arc::new(AttemptLedger::new());
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut status: HashMap<&str, TaskStatus> = plan
            .tasks()
            .iter()
            .map(|t| (t.id.as_str(), TaskStatus::Pending))
            .collect();
        let mut outputs: Map<String, Value> = Map::new();
        let mut completions: Vec<TaskCompletion> = Vec::with_capacity(plan.len());
        let mut in_flight = FuturesUnordered::new();

        info!(execution_id, tasks = plan.len(), "Dispatching plan");

        loop {
            if cancel.is_cancelled() {
                for task in plan.tasks() {
                    if status.get(task.id.as_str()) == Some(&TaskStatus::Pending) {
                        status.insert(task.id.as_str(), TaskStatus::Skipped);
                        completions.push(TaskCompletion {
                            task_id: task.id.clone(),
                            capability: task.capability,
                            status: TaskStatus::Skipped,
                            result: None,
                            failure: Some(TaskFailure::cancelled(&task.id, 0)),
                            settled_at: Utc::now(),
                        });
                    }
                }
            } else {
                for task in plan.tasks() {
                    let ready = status.get(task.id.as_str()) == Some(&TaskStatus::Pending)
                        && task
                            .depends_on
                            .iter()
                            .all(|d| status.get(d.as_str()) == Some(&TaskStatus::Done));
                    if !ready {
                        continue;
                    }

                    let mut context = base_context.clone();
                    if !task.depends_on.is_empty() {
                        let dependencies: Map<String, Value> = task
                            .depends_on
                            .iter()
                            .filter_map(|d| outputs.get(d).map(|v| (d.clone(), v.clone())))
                            .collect();
                        context.insert(DEPENDENCIES_KEY.to_string(), Value::Object(dependencies));
                    }

                    status.insert(task.id.as_str(), TaskStatus::Running);
                    in_flight.push(self.run_one(execution_id, task, context, cancel, &ledger, &semaphore));
                }
            }

            let Some((task_id, outcome)) = in_flight.next().await else {
                break;
            };
            let Some(task) = plan.task(&task_id) else {
                continue;
            };

            match outcome {
                Ok(result) => {
                    status.insert(task.id.as_str(), TaskStatus::Done);
                    outputs.insert(task.id.clone(), Value::String(result.output.content.clone()));
                    completions.push(TaskCompletion {
                        task_id: task.id.clone(),
                        capability: task.capability,
                        status: TaskStatus::Done,
                        result: Some(result),
                        failure: None,
                        settled_at: Utc::now(),
                    });
                }
                Err(failure) => {
                    let terminal = if failure.cancelled {
                        TaskStatus::Skipped
                    } else {
                        TaskStatus::Failed
                    };
                    status.insert(task.id.as_str(), terminal);
                    let cancelled = failure.cancelled;
                    completions.push(TaskCompletion {
                        task_id: task.id.clone(),
                        capability: task.capability,
                        status: terminal,
                        result: None,
                        failure: Some(failure),
                        settled_at: Utc::now(),
                    });

                    for dependent in plan.transitive_dependents(&task.id) {
                        let Some(dependent_task) = plan.task(&dependent) else {
                            continue;
                        };
                        if status.get(dependent_task.id.as_str()) != Some(&TaskStatus::Pending) {
                            continue;
                        }
                        debug!(execution_id, task_id = %dependent, upstream = %task.id, "Skipping dependent task");
                        status.insert(dependent_task.id.as_str(), TaskStatus::Skipped);
                        completions.push(TaskCompletion {
                            task_id: dependent.clone(),
                            capability: dependent_task.capability,
                            status: TaskStatus::Skipped,
                            result: None,
                            failure: Some(TaskFailure::upstream(&dependent, &task.id, cancelled)),
                            settled_at: Utc::now(),
                        });
                    }
                }
            }
        }

        let report = DispatchReport {
            completions,
            cancelled: cancel.is_cancelled(),
            discarded_duplicates: ledger.discarded(),
        };
        info!(
            execution_id,
            done = report.done_count(),
            settled = report.completions.len(),
            cancelled = report.cancelled,
            "Dispatch finished"
        );
        report
    }
}
