//! Routing profiles and the decision produced by an intent router.

use crate::graph::Node;
use capability::CapabilityKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a request is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingProfile {
    /// Single llm task
    DirectLlm,
    /// Single agent task
    AgentDelegation,
    /// Single tool task
    ToolAugmented,
    /// Planner-produced task DAG
    MultiStepPlan,
}

impl RoutingProfile {
    /// Profiles in scoring order. Earlier profiles are listed first in logs.
    pub const ALL: [RoutingProfile; 4] = [
        RoutingProfile::DirectLlm,
        RoutingProfile::AgentDelegation,
        RoutingProfile::ToolAugmented,
        RoutingProfile::MultiStepPlan,
    ];

    /// Capability of the single task implied by the profile.
    pub fn implied_capability(&self) -> Option<CapabilityKind> {
        match self {
            RoutingProfile::DirectLlm => Some(CapabilityKind::Llm),
            RoutingProfile::AgentDelegation => Some(CapabilityKind::Agent),
            RoutingProfile::ToolAugmented => Some(CapabilityKind::Tool),
            RoutingProfile::MultiStepPlan => None,
        }
    }

    /// Nodes a run under this profile is expected to visit.
    ///
    /// For plans the dispatch nodes depend on the tasks, so none are listed.
    pub fn node_sequence(&self) -> Vec<Node> {
        let mut nodes = vec![Node::IntentRouter];
        match self.implied_capability() {
            Some(kind) => nodes.push(Node::for_capability(kind)),
            None => nodes.push(Node::Planner),
        }
        nodes.extend([Node::Grounding, Node::MemoryStore, Node::End]);
        nodes
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingProfile::DirectLlm => "direct_llm",
            RoutingProfile::AgentDelegation => "agent_delegation",
            RoutingProfile::ToolAugmented => "tool_augmented",
            RoutingProfile::MultiStepPlan => "multi_step_plan",
        }
    }
}

impl fmt::Display for RoutingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct_llm" | "direct" | "llm" => Ok(RoutingProfile::DirectLlm),
            "agent_delegation" | "agent" => Ok(RoutingProfile::AgentDelegation),
            "tool_augmented" | "tool" => Ok(RoutingProfile::ToolAugmented),
            "multi_step_plan" | "multi_step" | "plan" => Ok(RoutingProfile::MultiStepPlan),
            other => Err(format!("unknown routing profile '{}'", other)),
        }
    }
}

/// Outcome of intent classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub profile: RoutingProfile,
    /// Score of the winning profile in `[0, 1]`
    pub confidence: f64,
    /// Named client for the implied task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub node_sequence: Vec<Node>,
    pub router_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    /// The default profile was used because classification was ambiguous
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RoutingDecision {
    pub fn new(profile: RoutingProfile, confidence: f64, router_version: impl Into<String>) -> Self {
        Self {
            profile,
            confidence,
            target: None,
            node_sequence: profile.node_sequence(),
            router_version: router_version.into(),
            matched_rule: None,
            degraded: false,
            reason: None,
        }
    }

    /// Decision for an ambiguous classification.
    pub fn degraded(
        profile: RoutingProfile,
        confidence: f64,
        router_version: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            degraded: true,
            reason: Some(reason.into()),
            ..Self::new(profile, confidence, router_version)
        }
    }

    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }

    pub fn with_matched_rule(mut self, rule: impl Into<String>) -> Self {
        self.matched_rule = Some(rule.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parse() {
        assert_eq!(
            "multi_step_plan".parse::<RoutingProfile>().unwrap(),
            RoutingProfile::MultiStepPlan
        );
        assert_eq!("Tool".parse::<RoutingProfile>().unwrap(), RoutingProfile::ToolAugmented);
        assert!("chitchat".parse::<RoutingProfile>().is_err());
    }

    #[test]
    fn test_node_sequence() {
        assert_eq!(
            RoutingProfile::DirectLlm.node_sequence(),
            vec![
                Node::IntentRouter,
                Node::LlmAgent,
                Node::Grounding,
                Node::MemoryStore,
                Node::End
            ]
        );
        assert_eq!(RoutingProfile::MultiStepPlan.node_sequence()[1], Node::Planner);
    }

    #[test]
    fn test_degraded_decision() {
        let decision = RoutingDecision::degraded(RoutingProfile::DirectLlm, 0.2, "v1", "low score");
        assert!(decision.degraded);
        assert_eq!(decision.reason.as_deref(), Some("low score"));
        assert_eq!(decision.profile, RoutingProfile::DirectLlm);
    }
}
