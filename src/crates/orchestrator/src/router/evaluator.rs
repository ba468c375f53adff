//! Rule evaluation engine for routing decisions
//!
//! Evaluates routing rule conditions against the request text and caller
//! metadata. Regex patterns are compiled once when the evaluator is built.

use crate::config::{ConditionCheck, RouteRule, RuleCondition};
use crate::{OrchestratorError, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Context for rule evaluation
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// Input text to match against
    pub input_text: String,
    /// Metadata values for lookups
    pub context: Map<String, Value>,
}

impl EvaluationContext {
    /// Create a new evaluation context
    pub fn new(input_text: impl Into<String>) -> Self {
        Self {
            input_text: input_text.into(),
            context: Map::new(),
        }
    }

    /// Add a context value
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Set multiple context values
    pub fn with_context_map(mut self, context: Map<String, Value>) -> Self {
        self.context.extend(context);
        self
    }
}

/// Compile a rule pattern, accepting the `/pattern/flags` form.
pub(crate) fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let (regex_pattern, case_insensitive) = parse_regex_pattern(pattern);
    if case_insensitive {
        Regex::new(&format!("(?i){}", regex_pattern))
    } else {
        Regex::new(&regex_pattern)
    }
}

/// Parse regex pattern, extracting flags
fn parse_regex_pattern(pattern: &str) -> (String, bool) {
    if pattern.starts_with('/') {
        if let Some(end_pos) = pattern.rfind('/') {
            if end_pos > 0 {
                let regex_pattern = pattern[1..end_pos].to_string();
                let flags = &pattern[end_pos + 1..];
                return (regex_pattern, flags.contains('i'));
            }
        }
    }

    (pattern.to_string(), false)
}

/// Rule evaluator for routing decisions
#[derive(Debug, Default)]
pub struct RuleEvaluator {
    compiled: HashMap<String, Regex>,
}

impl RuleEvaluator {
    /// Create an evaluator without precompiled patterns
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an evaluator with every text pattern of `rules` precompiled
    pub fn for_rules(rules: &[RouteRule]) -> Result<Self> {
        let mut compiled = HashMap::new();
        for rule in rules {
            for check in rule.when.checks() {
                if let ConditionCheck::Text { pattern } = check {
                    if compiled.contains_key(pattern) {
                        continue;
                    }
                    let regex = compile_pattern(pattern).map_err(|e| {
                        OrchestratorError::Config(format!(
                            "Invalid regex pattern '{}' in rule '{}': {}",
                            pattern, rule.name, e
                        ))
                    })?;
                    compiled.insert(pattern.clone(), regex);
                }
            }
        }
        Ok(Self { compiled })
    }

    /// Evaluate a routing rule against the context
    ///
    /// Returns `true` if the rule matches, `false` otherwise
    pub fn evaluate_rule(&self, rule: &RouteRule, context: &EvaluationContext) -> Result<bool> {
        self.evaluate_condition(&rule.when, context)
    }

    /// Evaluate a rule condition
    fn evaluate_condition(
        &self,
        condition: &RuleCondition,
        context: &EvaluationContext,
    ) -> Result<bool> {
        match condition {
            RuleCondition::Single(check) => self.evaluate_check(check, context),
            RuleCondition::All { all } => {
                for check in all {
                    if !self.evaluate_check(check, context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            RuleCondition::Any { any } => {
                for check in any {
                    if self.evaluate_check(check, context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            RuleCondition::Not { not } => {
                for check in not {
                    if self.evaluate_check(check, context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Evaluate an individual condition check
    fn evaluate_check(&self, check: &ConditionCheck, context: &EvaluationContext) -> Result<bool> {
        match check {
            ConditionCheck::Text { pattern } => self.evaluate_text_pattern(pattern, context),
            ConditionCheck::ContextHas { key } => Ok(context.context.contains_key(key)),
            ConditionCheck::ContextEquals { key, value } => {
                Ok(context.context.get(key) == Some(value))
            }
            ConditionCheck::Contains { keywords } => Ok(self.evaluate_contains(keywords, context)),
        }
    }

    /// Evaluate a text pattern (regex)
    fn evaluate_text_pattern(&self, pattern: &str, context: &EvaluationContext) -> Result<bool> {
        if let Some(regex) = self.compiled.get(pattern) {
            return Ok(regex.is_match(&context.input_text));
        }

        let regex = compile_pattern(pattern).map_err(|e| {
            OrchestratorError::General(format!("Invalid regex pattern '{}': {}", pattern, e))
        })?;
        Ok(regex.is_match(&context.input_text))
    }

    /// Evaluate contains check (case-insensitive keyword matching)
    fn evaluate_contains(&self, keywords: &[String], context: &EvaluationContext) -> bool {
        let input_lower = context.input_text.to_lowercase();
        keywords
            .iter()
            .any(|keyword| input_lower.contains(&keyword.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RoutingProfile;

    #[test]
    fn test_context_map_merges_request_metadata() {
        let mut metadata = Map::new();
        metadata.insert("channel".into(), Value::String("voice".into()));
        let ctx = EvaluationContext::new("book a table")
            .with_context_map(metadata)
            .with_context("priority", Value::Bool(true));

        assert_eq!(ctx.context.len(), 2);
        assert_eq!(ctx.context.get("priority"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_text_pattern_matches_numbers() {
        let evaluator = RuleEvaluator::new();
        let ctx = EvaluationContext::new("convert 250 euros");

        let check = ConditionCheck::Text {
            pattern: r"\d{3}".to_string(),
        };

        assert!(evaluator.evaluate_check(&check, &ctx).unwrap());
    }

    #[test]
    fn test_text_pattern_case_insensitive() {
        let evaluator = RuleEvaluator::new();
        let ctx = EvaluationContext::new("CALCULATE the total");

        let check = ConditionCheck::Text {
            pattern: "/calculate/i".to_string(),
        };

        assert!(evaluator.evaluate_check(&check, &ctx).unwrap());
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let evaluator = RuleEvaluator::new();
        let ctx = EvaluationContext::new("x");
        let check = ConditionCheck::Text {
            pattern: "(".to_string(),
        };
        assert!(evaluator.evaluate_check(&check, &ctx).is_err());
    }

    #[test]
    fn test_context_checks() {
        let evaluator = RuleEvaluator::new();
        let ctx = EvaluationContext::new("test")
            .with_context("channel", Value::String("voice".to_string()));

        let has = ConditionCheck::ContextHas {
            key: "channel".to_string(),
        };
        let equals = ConditionCheck::ContextEquals {
            key: "channel".to_string(),
            value: Value::String("voice".to_string()),
        };
        let wrong = ConditionCheck::ContextEquals {
            key: "channel".to_string(),
            value: Value::String("web".to_string()),
        };

        assert!(evaluator.evaluate_check(&has, &ctx).unwrap());
        assert!(evaluator.evaluate_check(&equals, &ctx).unwrap());
        assert!(!evaluator.evaluate_check(&wrong, &ctx).unwrap());
    }

    #[test]
    fn test_contains_case_insensitive() {
        let evaluator = RuleEvaluator::new();
        let ctx = EvaluationContext::new("What's the WEATHER in Oslo?");

        assert!(evaluator.evaluate_contains(&["weather".to_string()], &ctx));
        assert!(!evaluator.evaluate_contains(&["stock".to_string()], &ctx));
    }

    #[test]
    fn test_combinators() {
        let evaluator = RuleEvaluator::new();
        let ctx = EvaluationContext::new("normal message").with_context("mode", Value::Bool(true));

        let all = RuleCondition::All {
            all: vec![
                ConditionCheck::Text {
                    pattern: "normal".to_string(),
                },
                ConditionCheck::ContextHas {
                    key: "mode".to_string(),
                },
            ],
        };
        let not = RuleCondition::Not {
            not: vec![ConditionCheck::Text {
                pattern: "error".to_string(),
            }],
        };
        let any = RuleCondition::Any {
            any: vec![ConditionCheck::Text {
                pattern: "missing".to_string(),
            }],
        };

        assert!(evaluator.evaluate_condition(&all, &ctx).unwrap());
        assert!(evaluator.evaluate_condition(&not, &ctx).unwrap());
        assert!(!evaluator.evaluate_condition(&any, &ctx).unwrap());
    }

    #[test]
    fn test_precompiled_rules() {
        let rule = RouteRule::new(
            "math",
            RuleCondition::text(r"/\d+\s*[-+*/]\s*\d+/i"),
            RoutingProfile::ToolAugmented,
        );
        let evaluator = RuleEvaluator::for_rules(std::slice::from_ref(&rule)).unwrap();
        assert_eq!(evaluator.compiled.len(), 1);
        assert!(evaluator
            .evaluate_rule(&rule, &EvaluationContext::new("what is 12 * 7"))
            .unwrap());

        let broken = RouteRule::new("broken", RuleCondition::text("["), RoutingProfile::DirectLlm);
        assert!(RuleEvaluator::for_rules(&[broken]).is_err());
    }
}
