//! Rule-based intent router
//!
//! Scores every routing profile by summing the weights of the rules that
//! match the request, clamps each score to 1.0 and picks the top profile.
//! Ambiguous outcomes (nothing matched, a tie between profiles, or a top score
//! under the confidence threshold) fall back to the configured default
//! profile and are flagged `degraded`.

use crate::config::{RouteRule, RouterConfig, RuleCondition};
use crate::request::RequestInput;
use crate::router::evaluator::{EvaluationContext, RuleEvaluator};
use crate::router::{RoutingDecision, RoutingProfile};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const SCORE_EPSILON: f64 = 1e-9;

/// Classifies a request into a routing profile.
///
/// Implementations must be deterministic for identical input and router
/// version, and must never fail: ambiguity yields a degraded decision.
#[async_trait]
pub trait IntentRouter: Send + Sync {
    /// Version tag recorded in decisions
    fn version(&self) -> &str;

    /// Classify a request
    async fn classify(&self, input: &RequestInput) -> RoutingDecision;
}

/// Built-in rules covering the common request shapes.
pub fn default_rules() -> Vec<RouteRule> {
    vec![
        RouteRule::new(
            "numbered_steps",
            RuleCondition::text(r"(?ms)^\s*(?:\d+[.)]|[-*•])\s+\S.*^\s*(?:\d+[.)]|[-*•])\s+\S"),
            RoutingProfile::MultiStepPlan,
        )
        .with_weight(0.9),
        RouteRule::new(
            "sequenced_clauses",
            RuleCondition::text(
                r"/(\band then\b|,\s*then\b|\bafter that\b|\bafterwards\b|\bfollowed by\b)/i",
            ),
            RoutingProfile::MultiStepPlan,
        )
        .with_weight(0.6),
        RouteRule::new(
            "delegation_keywords",
            RuleCondition::contains([
                "research",
                "investigate",
                "book a",
                "schedule",
                "delegate",
                "negotiate",
            ]),
            RoutingProfile::AgentDelegation,
        )
        .with_weight(0.7),
        RouteRule::new(
            "tool_keywords",
            RuleCondition::contains([
                "calculate",
                "compute",
                "convert",
                "weather",
                "look up",
                "exchange rate",
            ]),
            RoutingProfile::ToolAugmented,
        )
        .with_weight(0.7),
        RouteRule::new(
            "arithmetic",
            RuleCondition::text(r"\d+(?:\.\d+)?\s*[-+*/^%]\s*\d+"),
            RoutingProfile::ToolAugmented,
        )
        .with_weight(0.6),
        RouteRule::new(
            "plain_question",
            RuleCondition::text(r"^[^\n]{1,300}\?\s*$"),
            RoutingProfile::DirectLlm,
        )
        .with_weight(0.6),
    ]
}

/// Deterministic router over weighted declarative rules.
#[derive(Debug)]
pub struct RuleRouter {
    config: RouterConfig,
    rules: Vec<RouteRule>,
    evaluator: RuleEvaluator,
}

impl RuleRouter {
    /// Build a router, precompiling every rule pattern.
    pub fn new(config: RouterConfig) -> Result<Self> {
        config.validate()?;

        let mut rules = if config.include_default_rules {
            default_rules()
        } else {
            Vec::new()
        };
        rules.extend(config.rules.iter().cloned());

        let evaluator = RuleEvaluator::for_rules(&rules)?;
        Ok(Self {
            config,
            rules,
            evaluator,
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Synchronous rule classification.
    pub fn classify_rules(&self, input: &RequestInput) -> RoutingDecision {
        let version = self.config.version.as_str();
        let default = self.config.default_profile;

        let ctx = EvaluationContext::new(input.prompt.clone())
            .with_context_map(input.metadata.clone());

        let mut scores: BTreeMap<RoutingProfile, (f64, Option<&RouteRule>)> = BTreeMap::new();
        for rule in &self.rules {
            match self.evaluator.evaluate_rule(rule, &ctx) {
                Ok(true) => {
                    let entry = scores.entry(rule.profile).or_insert((0.0, None));
                    entry.0 += rule.weight;
                    if entry.1.map(|best| rule.weight > best.weight).unwrap_or(true) {
                        entry.1 = Some(rule);
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "Rule evaluation failed, treating as no match");
                }
            }
        }

        if scores.is_empty() {
            return RoutingDecision::degraded(default, 0.0, version, "no routing rule matched");
        }

        let top = scores
            .values()
            .map(|(score, _)| score.min(1.0))
            .fold(0.0, f64::max);
        let leaders: Vec<(&RoutingProfile, &Option<&RouteRule>)> = scores
            .iter()
            .filter(|(_, (score, _))| (score.min(1.0) - top).abs() < SCORE_EPSILON)
            .map(|(profile, (_, rule))| (profile, rule))
            .collect();

        if leaders.len() > 1 {
            let tied: Vec<&str> = leaders.iter().map(|(p, _)| p.as_str()).collect();
            return RoutingDecision::degraded(
                default,
                top,
                version,
                format!("tie between {}", tied.join(", ")),
            );
        }

        if top < self.config.confidence_threshold {
            return RoutingDecision::degraded(
                default,
                top,
                version,
                format!(
                    "top score {:.2} below threshold {:.2}",
                    top, self.config.confidence_threshold
                ),
            );
        }

        let (profile, rule) = (*leaders[0].0, *leaders[0].1);
        let metadata_target = input
            .metadata
            .get("target")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut decision = RoutingDecision::new(profile, top, version)
            .with_target(rule.and_then(|r| r.target.clone()).or(metadata_target));
        if let Some(rule) = rule {
            decision = decision.with_matched_rule(rule.name.clone());
        }

        debug!(
            profile = %decision.profile,
            confidence = decision.confidence,
            rule = ?decision.matched_rule,
            "Request classified"
        );
        decision
    }
}

#[async_trait]
impl IntentRouter for RuleRouter {
    fn version(&self) -> &str {
        &self.config.version
    }

    async fn classify(&self, input: &RequestInput) -> RoutingDecision {
        self.classify_rules(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router() -> RuleRouter {
        RuleRouter::new(RouterConfig::default()).unwrap()
    }

    fn classify(text: &str) -> RoutingDecision {
        router().classify_rules(&RequestInput::new(text))
    }

    #[test]
    fn test_plain_question_is_direct() {
        let decision = classify("What is the capital of France?");
        assert_eq!(decision.profile, RoutingProfile::DirectLlm);
        assert!(!decision.degraded);
        assert_eq!(decision.matched_rule.as_deref(), Some("plain_question"));
    }

    #[test]
    fn test_numbered_list_is_multi_step() {
        let decision = classify("1. Summarize alpha\n2. Summarize beta\n3. Summarize gamma");
        assert_eq!(decision.profile, RoutingProfile::MultiStepPlan);
        assert!((decision.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_tool_and_agent_keywords() {
        assert_eq!(classify("calculate 12 * 7").profile, RoutingProfile::ToolAugmented);
        assert_eq!(
            classify("Research the history of the printing press").profile,
            RoutingProfile::AgentDelegation
        );
    }

    #[test]
    fn test_scores_are_clamped() {
        // tool_keywords (0.7) + arithmetic (0.6)
        let decision = classify("compute 3 + 4");
        assert_eq!(decision.profile, RoutingProfile::ToolAugmented);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_no_match_degrades_to_default() {
        let decision = classify("hello there");
        assert_eq!(decision.profile, RoutingProfile::DirectLlm);
        assert!(decision.degraded);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_tie_degrades_to_default() {
        // plain_question (0.6) vs arithmetic (0.6)
        let decision = classify("is 2 + 2 four?");
        assert!(decision.degraded);
        assert_eq!(decision.profile, RoutingProfile::DirectLlm);
        assert!(decision.reason.unwrap().contains("tie"));
    }

    #[test]
    fn test_threshold_is_configurable() {
        let strict = RuleRouter::new(RouterConfig::default().with_threshold(0.8)).unwrap();
        let decision = strict.classify_rules(&RequestInput::new("Research tides"));
        assert!(decision.degraded);
        assert_eq!(decision.profile, RoutingProfile::DirectLlm);

        let lenient = RuleRouter::new(RouterConfig::default().with_threshold(0.5)).unwrap();
        let decision = lenient.classify_rules(&RequestInput::new("Research tides"));
        assert_eq!(decision.profile, RoutingProfile::AgentDelegation);
    }

    #[test]
    fn test_custom_rule_target_and_metadata() {
        let config = RouterConfig::default().without_default_rules().with_rule(
            RouteRule::new(
                "voice_channel",
                crate::config::RuleCondition::Single(crate::config::ConditionCheck::ContextEquals {
                    key: "channel".into(),
                    value: json!("support"),
                }),
                RoutingProfile::AgentDelegation,
            )
            .with_target("support_agent"),
        );
        let router = RuleRouter::new(config).unwrap();
        let input = RequestInput::new("my order is late").with_metadata("channel", json!("support"));

        let decision = router.classify_rules(&input);
        assert_eq!(decision.profile, RoutingProfile::AgentDelegation);
        assert_eq!(decision.target.as_deref(), Some("support_agent"));
    }

    #[test]
    fn test_deterministic() {
        let router = router();
        let input = RequestInput::new("convert 10 USD to EUR, then summarize the rate trend");
        let first = router.classify_rules(&input);
        for _ in 0..10 {
            assert_eq!(router.classify_rules(&input), first);
        }
    }
}
