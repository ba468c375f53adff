//! Intent router configuration
//!
//! Declarative, weighted routing rules. Each rule votes for one routing
//! profile; a profile's score is the sum of its matched rule weights.

use crate::router::RoutingProfile;
use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};

/// Intent router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Version tag recorded in every routing decision
    pub version: String,
    /// Minimum winning score; below it the default profile is used
    pub confidence_threshold: f64,
    /// Profile used when classification is ambiguous
    pub default_profile: RoutingProfile,
    /// Prepend the built-in rule set to `rules`
    pub include_default_rules: bool,
    /// Routing rules (evaluated in order)
    pub rules: Vec<RouteRule>,
    /// Optional model-backed classifier consulted before the rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier: Option<ClassifierConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            version: "rules-v1".to_string(),
            confidence_threshold: 0.5,
            default_profile: RoutingProfile::DirectLlm,
            include_default_rules: true,
            rules: Vec::new(),
            classifier: None,
        }
    }
}

impl RouterConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_rule(mut self, rule: RouteRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn without_default_rules(mut self) -> Self {
        self.include_default_rules = false;
        self
    }

    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Validate thresholds, weights and regex patterns
    pub fn validate(&self) -> Result<()> {
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err(OrchestratorError::Config(format!(
                "router.confidence_threshold must be in (0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.default_profile == RoutingProfile::MultiStepPlan {
            return Err(OrchestratorError::Config(
                "router.default_profile cannot be multi_step_plan".to_string(),
            ));
        }
        for rule in &self.rules {
            rule.validate()?;
        }
        if let Some(classifier) = &self.classifier {
            if classifier.timeout_ms == 0 {
                return Err(OrchestratorError::Config(
                    "router.classifier.timeout_ms must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// A single weighted routing rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Rule name/identifier
    pub name: String,
    /// Conditions for this rule to match
    pub when: RuleCondition,
    /// Profile this rule votes for
    pub profile: RoutingProfile,
    /// Vote weight in `(0, 1]`
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Named client for the implied task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

impl RouteRule {
    pub fn new(name: impl Into<String>, when: RuleCondition, profile: RoutingProfile) -> Self {
        Self {
            name: name.into(),
            when,
            profile,
            weight: default_weight(),
            target: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.weight > 0.0 && self.weight <= 1.0) {
            return Err(OrchestratorError::Config(format!(
                "rule '{}' weight must be in (0, 1], got {}",
                self.name, self.weight
            )));
        }
        for check in self.when.checks() {
            if let ConditionCheck::Text { pattern } = check {
                crate::router::evaluator::compile_pattern(pattern).map_err(|e| {
                    OrchestratorError::Config(format!("rule '{}': {}", self.name, e))
                })?;
            }
        }
        Ok(())
    }
}

/// Conditions for rule matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleCondition {
    /// Single condition
    Single(ConditionCheck),
    /// All conditions must match (AND)
    All { all: Vec<ConditionCheck> },
    /// Any condition must match (OR)
    Any { any: Vec<ConditionCheck> },
    /// No conditions must match (NOT)
    Not { not: Vec<ConditionCheck> },
}

impl RuleCondition {
    /// Regex text match
    pub fn text(pattern: impl Into<String>) -> Self {
        RuleCondition::Single(ConditionCheck::Text {
            pattern: pattern.into(),
        })
    }

    /// Case-insensitive keyword match
    pub fn contains<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RuleCondition::Single(ConditionCheck::Contains {
            keywords: keywords.into_iter().map(Into::into).collect(),
        })
    }

    /// All checks in the condition
    pub fn checks(&self) -> Vec<&ConditionCheck> {
        match self {
            RuleCondition::Single(check) => vec![check],
            RuleCondition::All { all } => all.iter().collect(),
            RuleCondition::Any { any } => any.iter().collect(),
            RuleCondition::Not { not } => not.iter().collect(),
        }
    }
}

/// Individual condition check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionCheck {
    /// Match text against regex pattern (`/pattern/i` for case-insensitive)
    Text { pattern: String },
    /// Check if request metadata has a specific key
    ContextHas { key: String },
    /// Check if request metadata key equals value
    ContextEquals { key: String, value: serde_json::Value },
    /// Check if input contains any keyword
    Contains { keywords: Vec<String> },
}

/// Model-backed classifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Named llm client (None = default llm client)
    #[serde(default)]
    pub target: Option<String>,
    /// Call timeout in milliseconds
    #[serde(default = "default_classifier_timeout")]
    pub timeout_ms: u64,
}

fn default_classifier_timeout() -> u64 {
    5_000
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            target: None,
            timeout_ms: default_classifier_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.default_profile, RoutingProfile::DirectLlm);
        assert!(config.include_default_rules);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rule_deserialization() {
        let yaml = r#"
name: weather
profile: tool_augmented
weight: 0.8
target: weather_api
when:
  any:
    - type: contains
      keywords: [weather, forecast]
    - type: context_has
      key: location
"#;
        let rule: RouteRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.profile, RoutingProfile::ToolAugmented);
        assert_eq!(rule.target.as_deref(), Some("weather_api"));
        assert_eq!(rule.when.checks().len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RouterConfig::default().with_threshold(0.0).validate().is_err());
        assert!(RouterConfig::default().with_threshold(1.5).validate().is_err());

        let heavy = RouteRule::new("x", RuleCondition::text("a"), RoutingProfile::DirectLlm)
            .with_weight(2.0);
        assert!(RouterConfig::default().with_rule(heavy).validate().is_err());

        let bad_regex = RouteRule::new("y", RuleCondition::text("(unclosed"), RoutingProfile::DirectLlm);
        assert!(RouterConfig::default().with_rule(bad_regex).validate().is_err());
    }
}
