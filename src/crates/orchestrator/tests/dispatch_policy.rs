//! Dispatcher policy: retry schedule, late answers, skipping and fan-out.

use async_trait::async_trait;
use capability::testing::{ScriptStep, ScriptedClient};
use capability::{
    CapabilityClient, CapabilityError, CapabilityKind, CapabilityOutput, CapabilityRegistry,
    CapabilityRequest,
};
use memory_store::InMemoryStore;
use orchestrator::executor::{CacheConfig, DispatchConfig, Dispatcher, RetryConfig};
use orchestrator::{Plan, Task, TaskStatus};
use serde_json::Map;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn dispatcher(client: Arc<dyn CapabilityClient>, config: DispatchConfig) -> Dispatcher {
    let registry = CapabilityRegistry::builder().register(client).build().unwrap();
    Dispatcher::new(Arc::new(registry), Arc::new(InMemoryStore::new()), config).unwrap()
}

fn base_config() -> DispatchConfig {
    DispatchConfig {
        call_timeout_ms: 1_000,
        retry: RetryConfig::new(2).with_initial_backoff(100).with_max_backoff(5_000),
        max_concurrency: 4,
        cache: CacheConfig::disabled(),
    }
}

/// Always fails with a retryable error and records when each call arrived.
struct FlakyClient {
    arrivals: Mutex<Vec<Instant>>,
}

#[async_trait]
impl CapabilityClient for FlakyClient {
    fn name(&self) -> &str {
        "flaky"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Tool
    }

    async fn invoke(
        &self,
        _request: &CapabilityRequest,
        _timeout: Duration,
    ) -> capability::Result<CapabilityOutput> {
        self.arrivals.lock().unwrap().push(Instant::now());
        Err(CapabilityError::Unavailable {
            capability: "tool".into(),
            message: "503 service unavailable".into(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_between_attempts_strictly_increases() {
    let client = Arc::new(FlakyClient {
        arrivals: Mutex::new(Vec::new()),
    });
    let mut config = base_config();
    config.retry = RetryConfig::new(4)
        .with_initial_backoff(100)
        .with_multiplier(2.0)
        .with_max_backoff(10_000);
    let retry = config.retry.clone();
    let dispatcher = dispatcher(client.clone(), config);

    let task = Task::new("t1", CapabilityKind::Tool, "ping");
    let failure = dispatcher
        .execute_task("exec", &task, Map::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 5);
    assert!(failure.retryable);

    let arrivals = client.arrivals.lock().unwrap().clone();
    assert_eq!(arrivals.len(), 5);
    let gaps: Vec<Duration> = arrivals.windows(2).map(|w| w[1] - w[0]).collect();
    for (i, gap) in gaps.iter().enumerate() {
        assert!(*gap >= retry.backoff_delay(i as u32), "gap {} too short: {:?}", i, gap);
    }
    assert!(gaps.windows(2).all(|w| w[1] > w[0]), "gaps not increasing: {:?}", gaps);
}

#[tokio::test(start_paused = true)]
async fn test_retry_count_is_bounded_by_max_retries() {
    let client = Arc::new(
        ScriptedClient::new("llm", CapabilityKind::Llm).with_steps(vec![
            ScriptStep::fail("overloaded", true),
            ScriptStep::fail("overloaded", true),
            ScriptStep::respond("third time lucky"),
        ]),
    );
    let dispatcher = dispatcher(client.clone(), base_config());

    let task = Task::new("t1", CapabilityKind::Llm, "hello");
    let result = dispatcher
        .execute_task("exec", &task, Map::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.content(), "third time lucky");
    assert_eq!(result.attempts, 3);
    assert_eq!(result.attempt_id, "t1#3");
    assert_eq!(client.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_first_success_wins_over_retry() {
    let client = Arc::new(ScriptedClient::new("llm", CapabilityKind::Llm).with_steps(vec![
        ScriptStep::respond_after(Duration::from_millis(1_500), "late original"),
        ScriptStep::respond_after(Duration::from_millis(2_000), "retry answer"),
    ]));
    let dispatcher = dispatcher(client.clone(), base_config());

    let task = Task::new("t1", CapabilityKind::Llm, "hello");
    let result = dispatcher
        .execute_task("exec", &task, Map::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.content(), "late original");
    assert_eq!(result.attempt_id, "t1#1");
    assert_eq!(result.attempts, 2);
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn test_failed_task_skips_its_chain_only() {
    let client = Arc::new(
        ScriptedClient::new("tool", CapabilityKind::Tool)
            .on_prompt("fetch", vec![ScriptStep::fail("not found", false)]),
    );
    let dispatcher = dispatcher(client.clone(), base_config());

    let plan = Plan::build(
        vec![
            Task::new("fetch", CapabilityKind::Tool, "fetch the page"),
            Task::new("parse", CapabilityKind::Tool, "parse it").depends_on("fetch"),
            Task::new("store", CapabilityKind::Tool, "store it").depends_on("parse"),
            Task::new("clock", CapabilityKind::Tool, "current time"),
        ],
        8,
    )
    .unwrap();

    let report = dispatcher
        .dispatch("exec", &plan, &Map::new(), &CancellationToken::new())
        .await;

    assert_eq!(report.status_of("fetch"), Some(TaskStatus::Failed));
    assert_eq!(report.status_of("parse"), Some(TaskStatus::Skipped));
    assert_eq!(report.status_of("store"), Some(TaskStatus::Skipped));
    assert_eq!(report.status_of("clock"), Some(TaskStatus::Done));
    assert_eq!(report.failures().len(), 1);
    assert_eq!(client.calls_matching("parse"), 0);
    assert_eq!(client.calls_matching("store"), 0);
}

/// Tracks how many calls are in progress at once.
struct GaugeClient {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl CapabilityClient for GaugeClient {
    fn name(&self) -> &str {
        "gauge"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Llm
    }

    async fn invoke(
        &self,
        request: &CapabilityRequest,
        _timeout: Duration,
    ) -> capability::Result<CapabilityOutput> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(CapabilityOutput::text(request.prompt.clone()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_respects_max_concurrency() {
    let client = Arc::new(GaugeClient {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut config = base_config();
    config.max_concurrency = 2;
    let dispatcher = dispatcher(client.clone(), config);

    let tasks = (1..=6)
        .map(|i| Task::new(format!("t{}", i), CapabilityKind::Llm, format!("part {}", i)))
        .collect();
    let plan = Plan::build(tasks, 8).unwrap();

    let started = Instant::now();
    let report = dispatcher
        .dispatch("exec", &plan, &Map::new(), &CancellationToken::new())
        .await;

    assert_eq!(report.done_count(), 6);
    assert_eq!(client.peak.load(Ordering::SeqCst), 2);
    // three waves of two calls
    assert!(started.elapsed() >= Duration::from_millis(300));
}
