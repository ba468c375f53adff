//! Intent routing
//!
//! Classifies a request into a [`RoutingProfile`]:
//! - [`RuleRouter`]: weighted declarative rules, deterministic
//! - [`ClassifierRouter`]: an llm classifier that falls back to the rules

pub mod classifier;
pub mod decision;
pub mod evaluator;
pub mod intent;

pub use classifier::ClassifierRouter;
pub use decision::{RoutingDecision, RoutingProfile};
pub use evaluator::{EvaluationContext, RuleEvaluator};
pub use intent::{default_rules, IntentRouter, RuleRouter};
