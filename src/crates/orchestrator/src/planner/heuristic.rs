//! Text-structure planner.
//!
//! - numbered or bulleted lines become independent tasks
//! - clauses joined by "then", "after that", ... become a sequential chain
//!
//! Each step's capability comes from the rule router: steps classified as
//! agent or tool work go to those capabilities, everything else to the llm.

use crate::planner::{Plan, PlanError, Planner};
use crate::request::RequestInput;
use crate::router::{RoutingDecision, RoutingProfile, RuleRouter};
use crate::Task;
use async_trait::async_trait;
use capability::CapabilityKind;
use regex::Regex;
use std::sync::Arc;

const LIST_ITEM: &str = r"(?m)^\s*(?:\d+[.)]|[-*•])\s+(\S.*?)\s*$";
const CHAIN_SEPARATOR: &str =
    r"(?i)(?:,\s*)?\b(?:and then|then|after that|afterwards|followed by)\b[,:]?\s*";

/// Planner that decomposes requests by their textual structure.
pub struct HeuristicPlanner {
    router: Arc<RuleRouter>,
    max_tasks: usize,
    list_item: Regex,
    chain_separator: Regex,
}

impl HeuristicPlanner {
    pub fn new(router: Arc<RuleRouter>, max_tasks: usize) -> crate::Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| crate::OrchestratorError::Config(e.to_string()))
        };
        Ok(Self {
            router,
            max_tasks,
            list_item: compile(LIST_ITEM)?,
            chain_separator: compile(CHAIN_SEPARATOR)?,
        })
    }

    fn list_steps(&self, prompt: &str) -> Vec<String> {
        self.list_item
            .captures_iter(prompt)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    fn chain_steps(&self, prompt: &str) -> Vec<String> {
        self.chain_separator
            .split(prompt)
            .map(|part| part.trim().trim_end_matches(['.', ';']).trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    }

    fn task_for(&self, id: String, step: String) -> Task {
        let decision = self.router.classify_rules(&RequestInput::new(step.clone()));
        let capability = match decision.profile {
            RoutingProfile::AgentDelegation => CapabilityKind::Agent,
            RoutingProfile::ToolAugmented => CapabilityKind::Tool,
            RoutingProfile::DirectLlm | RoutingProfile::MultiStepPlan => CapabilityKind::Llm,
        };
        let mut task = Task::new(id, capability, step);
        if capability != CapabilityKind::Llm {
            task.target = decision.target;
        }
        task
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn plan(&self, input: &RequestInput, _decision: &RoutingDecision) -> Result<Plan, PlanError> {
        let listed = self.list_steps(&input.prompt);
        let (steps, chained) = if !listed.is_empty() {
            (listed, false)
        } else {
            (self.chain_steps(&input.prompt), true)
        };

        let mut tasks: Vec<Task> = Vec::with_capacity(steps.len());
        for (i, step) in steps.into_iter().enumerate() {
            let mut task = self.task_for(format!("t{}", i + 1), step);
            if chained && i > 0 {
                task.depends_on.push(format!("t{}", i));
            }
            tasks.push(task);
        }

        Plan::build(tasks, self.max_tasks)
    }
}
