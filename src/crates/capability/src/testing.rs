//! Scripted client for tests (enabled with the `testing` feature).
//!
//! A [`ScriptedClient`] answers each call with the next [`ScriptStep`] from a
//! queue. Queues can be bound to a prompt substring so concurrent tasks that
//! share one client still get deterministic answers.

use crate::client::CapabilityClient;
use crate::error::{CapabilityError, Result};
use crate::types::{CapabilityKind, CapabilityOutput, CapabilityRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Succeed immediately with the given content.
    Respond(String),
    /// Sleep, then succeed.
    RespondAfter(Duration, String),
    /// Fail immediately.
    Fail { message: String, retryable: bool },
    /// Sleep, then fail.
    FailAfter(Duration, String, bool),
    /// Never answer (until dropped by the caller's timeout or cancellation).
    Hang,
}

impl ScriptStep {
    pub fn respond(content: impl Into<String>) -> Self {
        ScriptStep::Respond(content.into())
    }

    pub fn respond_after(delay: Duration, content: impl Into<String>) -> Self {
        ScriptStep::RespondAfter(delay, content.into())
    }

    pub fn fail(message: impl Into<String>, retryable: bool) -> Self {
        ScriptStep::Fail {
            message: message.into(),
            retryable,
        }
    }
}

struct PromptScript {
    matcher: String,
    steps: VecDeque<ScriptStep>,
}

/// Client answering from scripted steps.
pub struct ScriptedClient {
    name: String,
    kind: CapabilityKind,
    prompt_scripts: Mutex<Vec<PromptScript>>,
    default_steps: Mutex<VecDeque<ScriptStep>>,
    otherwise: ScriptStep,
    calls: Mutex<Vec<CapabilityRequest>>,
    call_count: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedClient {
    /// A client whose unscripted calls echo the prompt.
    pub fn new(name: impl Into<String>, kind: CapabilityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            prompt_scripts: Mutex::new(Vec::new()),
            default_steps: Mutex::new(VecDeque::new()),
            otherwise: ScriptStep::Respond(String::new()),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Queue steps for calls whose prompt matches no prompt script.
    pub fn with_steps(self, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        lock(&self.default_steps).extend(steps);
        self
    }

    /// Queue steps for calls whose prompt contains `matcher`.
    pub fn on_prompt(
        self,
        matcher: impl Into<String>,
        steps: impl IntoIterator<Item = ScriptStep>,
    ) -> Self {
        lock(&self.prompt_scripts).push(PromptScript {
            matcher: matcher.into(),
            steps: steps.into_iter().collect(),
        });
        self
    }

    /// Step used once every queue is drained. Defaults to echoing the prompt.
    pub fn otherwise(mut self, step: ScriptStep) -> Self {
        self.otherwise = step;
        self
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far, in arrival order.
    pub fn calls(&self) -> Vec<CapabilityRequest> {
        lock(&self.calls).clone()
    }

    /// Number of calls whose prompt contained `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|r| r.prompt.contains(needle))
            .count()
    }

    fn next_step(&self, prompt: &str) -> ScriptStep {
        {
            let mut scripts = lock(&self.prompt_scripts);
            if let Some(script) = scripts.iter_mut().find(|s| prompt.contains(&s.matcher)) {
                if let Some(step) = script.steps.pop_front() {
                    return step;
                }
            }
        }

        if let Some(step) = lock(&self.default_steps).pop_front() {
            return step;
        }

        match &self.otherwise {
            ScriptStep::Respond(content) if content.is_empty() => {
                ScriptStep::Respond(prompt.to_string())
            }
            other => other.clone(),
        }
    }

    fn failure(&self, message: String, retryable: bool) -> CapabilityError {
        CapabilityError::Failed {
            kind: self.kind.to_string(),
            message,
            retryable,
        }
    }
}

#[async_trait]
impl CapabilityClient for ScriptedClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    async fn invoke(
        &self,
        request: &CapabilityRequest,
        _timeout: Duration,
    ) -> Result<CapabilityOutput> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls).push(request.clone());

        match self.next_step(&request.prompt) {
            ScriptStep::Respond(content) => Ok(CapabilityOutput::text(content)),
            ScriptStep::RespondAfter(delay, content) => {
                tokio::time::sleep(delay).await;
                Ok(CapabilityOutput::text(content))
            }
            ScriptStep::Fail { message, retryable } => Err(self.failure(message, retryable)),
            ScriptStep::FailAfter(delay, message, retryable) => {
                tokio::time::sleep(delay).await;
                Err(self.failure(message, retryable))
            }
            ScriptStep::Hang => {
                std::future::pending::<()>().await;
                Err(self.failure("unreachable".into(), false))
            }
        }
    }
}
