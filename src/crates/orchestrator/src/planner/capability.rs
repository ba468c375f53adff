//! Model-driven planner.
//!
//! Asks a named llm client for a JSON decomposition, checks it against a JSON
//! schema, then against the DAG rules in [`Plan::build`].

use crate::parser::parse_json_value;
use crate::planner::{Plan, PlanError, Planner};
use crate::request::RequestInput;
use crate::router::RoutingDecision;
use crate::{OrchestratorError, Task};
use async_trait::async_trait;
use capability::{CapabilityKind, CapabilityRegistry, CapabilityRequest};
use jsonschema::JSONSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const PLANNER_PROMPT: &str = "Decompose the user request into a small set of tasks.\n\
Each task uses one capability: llm, agent, tool or grounding.\n\
Tasks may depend on earlier tasks by id. Independent tasks run in parallel.\n\
Answer with JSON only, in this shape:\n\
{\"tasks\": [{\"id\": \"t1\", \"capability\": \"llm\", \"target\": null, \"input\": \"...\", \"depends_on\": []}]}\n\n\
Request:\n";

/// JSON schema for the decomposition.
pub fn decomposition_schema() -> Value {
    json!({
        "type": "object",
        "required": ["tasks"],
        "properties": {
            "tasks": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["id", "capability", "input"],
                    "properties": {
                        "id": { "type": "string", "minLength": 1 },
                        "capability": { "enum": ["llm", "agent", "tool", "grounding"] },
                        "target": { "type": ["string", "null"] },
                        "input": { "type": "string", "minLength": 1 },
                        "depends_on": { "type": "array", "items": { "type": "string" } }
                    }
                }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct Decomposition {
    tasks: Vec<Task>,
}

/// Planner backed by an llm capability.
pub struct CapabilityPlanner {
    registry: Arc<CapabilityRegistry>,
    target: Option<String>,
    timeout: Duration,
    max_tasks: usize,
    schema: JSONSchema,
}

impl CapabilityPlanner {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        target: Option<String>,
        timeout: Duration,
        max_tasks: usize,
    ) -> crate::Result<Self> {
        let schema_value = decomposition_schema();
        let schema = JSONSchema::compile(&schema_value)
            .map_err(|e| OrchestratorError::Config(format!("invalid planner schema: {}", e)))?;
        Ok(Self {
            registry,
            target,
            timeout,
            max_tasks,
            schema,
        })
    }

    /// Parse and validate raw model output.
    pub fn parse(&self, content: &str) -> Result<Plan, PlanError> {
        let value = parse_json_value(content)
            .ok_or_else(|| PlanError::Malformed("no JSON object in planner output".into()))?;

        if let Err(errors) = self.schema.validate(&value) {
            let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(PlanError::Malformed(messages.join("; ")));
        }

        let decomposition: Decomposition =
            serde_json::from_value(value).map_err(|e| PlanError::Malformed(e.to_string()))?;
        Plan::build(decomposition.tasks, self.max_tasks)
    }
}

#[async_trait]
impl Planner for CapabilityPlanner {
    fn name(&self) -> &str {
        "capability"
    }

    async fn plan(&self, input: &RequestInput, _decision: &RoutingDecision) -> Result<Plan, PlanError> {
        let client = self
            .registry
            .resolve(CapabilityKind::Llm, self.target.as_deref())
            .map_err(|e| PlanError::Capability(e.to_string()))?;

        let mut request =
            CapabilityRequest::new(CapabilityKind::Llm, format!("{}{}", PLANNER_PROMPT, input.prompt));
        if let Some(target) = &self.target {
            request = request.with_target(target.clone());
        }

        let output = tokio::time::timeout(self.timeout, client.invoke(&request, self.timeout))
            .await
            .map_err(|_| PlanError::Capability(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| PlanError::Capability(e.to_string()))?;

        debug!(planner = self.name(), bytes = output.content.len(), "Decomposition received");
        self.parse(&output.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RoutingProfile;
    use capability::testing::{ScriptStep, ScriptedClient};

    fn planner_with(steps: Vec<ScriptStep>) -> CapabilityPlanner {
        let client = Arc::new(ScriptedClient::new("planner", CapabilityKind::Llm).with_steps(steps));
        let registry = CapabilityRegistry::builder().register(client).build().unwrap();
        CapabilityPlanner::new(Arc::new(registry), None, Duration::from_secs(5), 8).unwrap()
    }

    fn decision() -> RoutingDecision {
        RoutingDecision::new(RoutingProfile::MultiStepPlan, 0.9, "test")
    }

    #[tokio::test]
    async fn test_valid_decomposition() {
        let planner = planner_with(vec![ScriptStep::respond(
            r#"```json
{"tasks": [
  {"id": "t1", "capability": "grounding", "input": "find sources on tides"},
  {"id": "t2", "capability": "llm", "input": "explain tides", "depends_on": ["t1"]}
]}
```"#,
        )]);

        let plan = planner.plan(&RequestInput::new("explain tides"), &decision()).await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.tasks()[0].capability, CapabilityKind::Grounding);
        assert_eq!(plan.tasks()[1].depends_on, vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_self_dependency_is_rejected() {
        let planner = planner_with(vec![ScriptStep::respond(
            r#"{"tasks": [{"id": "t1", "capability": "llm", "input": "loop", "depends_on": ["t1"]}]}"#,
        )]);

        let err = planner.plan(&RequestInput::new("x"), &decision()).await.unwrap_err();
        assert_eq!(err, PlanError::Cycle(vec!["t1".into()]));
    }

    #[test]
    fn test_schema_violations_are_malformed() {
        let planner = planner_with(vec![]);
        assert!(matches!(
            planner.parse(r#"{"tasks": [{"id": "t1", "capability": "database", "input": "x"}]}"#),
            Err(PlanError::Malformed(_))
        ));
        assert!(matches!(planner.parse(r#"{"tasks": []}"#), Err(PlanError::Malformed(_))));
        assert!(matches!(planner.parse("no plan today"), Err(PlanError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_call_failure_is_reported() {
        let planner = planner_with(vec![ScriptStep::fail("overloaded", true)]);
        let err = planner.plan(&RequestInput::new("x"), &decision()).await.unwrap_err();
        assert!(matches!(err, PlanError::Capability(_)));
    }
}
