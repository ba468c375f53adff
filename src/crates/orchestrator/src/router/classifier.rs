//! Model-backed intent classifier with rule fallback
//!
//! Asks a lightweight llm client to label the request. Any failure (call
//! error, timeout, unparseable answer, unknown profile or low confidence)
//! falls back to the rule router, so classification never fails.

use crate::config::ClassifierConfig;
use crate::parser::parse_json;
use crate::request::RequestInput;
use crate::router::intent::{IntentRouter, RuleRouter};
use crate::router::{RoutingDecision, RoutingProfile};
use async_trait::async_trait;
use capability::{CapabilityKind, CapabilityRegistry, CapabilityRequest};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CLASSIFIER_PROMPT: &str = "Classify the user request into exactly one routing profile.\n\
Profiles:\n\
- direct_llm: a question or instruction a language model can answer alone\n\
- agent_delegation: open-ended work for a specialized agent (research, booking, scheduling)\n\
- tool_augmented: needs a tool call (calculation, conversion, live data lookup)\n\
- multi_step_plan: several distinct steps that must be decomposed\n\
Answer with JSON only: {\"profile\": \"<profile>\", \"confidence\": <0..1>, \"target\": null}\n\n\
Request:\n";

#[derive(Debug, Deserialize)]
struct ClassifierAnswer {
    profile: String,
    confidence: f64,
    #[serde(default)]
    target: Option<String>,
}

/// Intent router that consults an llm client before the rules.
pub struct ClassifierRouter {
    registry: Arc<CapabilityRegistry>,
    config: ClassifierConfig,
    fallback: RuleRouter,
    version: String,
}

impl ClassifierRouter {
    pub fn new(registry: Arc<CapabilityRegistry>, config: ClassifierConfig, fallback: RuleRouter) -> Self {
        let version = format!(
            "classifier:{}+{}",
            config.target.as_deref().unwrap_or("default"),
            fallback.version()
        );
        Self {
            registry,
            config,
            fallback,
            version,
        }
    }

    async fn ask_model(&self, input: &RequestInput) -> Option<RoutingDecision> {
        let client = match self
            .registry
            .resolve(CapabilityKind::Llm, self.config.target.as_deref())
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Classifier client unavailable");
                return None;
            }
        };

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let mut request =
            CapabilityRequest::new(CapabilityKind::Llm, format!("{}{}", CLASSIFIER_PROMPT, input.prompt));
        if let Some(target) = &self.config.target {
            request = request.with_target(target.clone());
        }

        let output = match tokio::time::timeout(timeout, client.invoke(&request, timeout)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(error = %e, "Classifier call failed");
                return None;
            }
            Err(_) => {
                warn!(timeout_ms = self.config.timeout_ms, "Classifier call timed out");
                return None;
            }
        };

        let answer: ClassifierAnswer = match parse_json(&output.content) {
            Some(answer) => answer,
            None => {
                warn!("Classifier answer was not valid JSON");
                return None;
            }
        };
        let profile: RoutingProfile = match answer.profile.parse() {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Classifier returned an unknown profile");
                return None;
            }
        };

        let confidence = answer.confidence.clamp(0.0, 1.0);
        if confidence < self.fallback.config().confidence_threshold {
            debug!(confidence, "Classifier confidence below threshold");
            return None;
        }

        Some(
            RoutingDecision::new(profile, confidence, self.version.clone())
                .with_target(answer.target)
                .with_matched_rule("classifier"),
        )
    }
}

#[async_trait]
impl IntentRouter for ClassifierRouter {
    fn version(&self) -> &str {
        &self.version
    }

    async fn classify(&self, input: &RequestInput) -> RoutingDecision {
        if let Some(decision) = self.ask_model(input).await {
            return decision;
        }
        let mut decision = self.fallback.classify_rules(input);
        decision.router_version = self.version.clone();
        decision
    }
}
