//! Validated task DAGs.
//!
//! A [`Plan`] can only be obtained through [`Plan::build`], which rejects
//! empty or oversized plans, duplicate or reserved ids, unknown dependencies
//! and cycles. A plan is never truncated to make it valid.

use crate::{Task, TaskStatus};
use capability::CapabilityKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Results key reserved for engine-side evidence retrieval.
pub const EVIDENCE_KEY: &str = "evidence";

/// Reasons a plan is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan has no tasks")]
    Empty,

    #[error("plan has {count} tasks, more than the limit of {max}")]
    TooManyTasks { count: usize, max: usize },

    #[error("duplicate task id '{0}'")]
    DuplicateId(String),

    #[error("task id '{0}' is reserved")]
    ReservedId(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("dependency cycle among tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("malformed decomposition: {0}")]
    Malformed(String),

    #[error("planner call failed: {0}")]
    Capability(String),
}

/// A validated DAG of tasks, kept in plan order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    tasks: Vec<Task>,
}

impl Plan {
    /// Validate `tasks` and build a plan.
    pub fn build(tasks: Vec<Task>, max_tasks: usize) -> Result<Self, PlanError> {
        if tasks.is_empty() {
            return Err(PlanError::Empty);
        }
        if tasks.len() > max_tasks {
            return Err(PlanError::TooManyTasks {
                count: tasks.len(),
                max: max_tasks,
            });
        }

        let mut ids = HashSet::new();
        for task in &tasks {
            if task.id.trim().is_empty() || task.id == EVIDENCE_KEY {
                return Err(PlanError::ReservedId(task.id.clone()));
            }
            if !ids.insert(task.id.as_str()) {
                return Err(PlanError::DuplicateId(task.id.clone()));
            }
        }

        for task in &tasks {
            for dependency in &task.depends_on {
                if !ids.contains(dependency.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let plan = Self { tasks };
        let order = plan.topological_order();
        if order.len() != plan.tasks.len() {
            let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
            let cyclic = plan
                .tasks
                .iter()
                .filter(|t| !ordered.contains(t.id.as_str()))
                .map(|t| t.id.clone())
                .collect();
            return Err(PlanError::Cycle(cyclic));
        }

        Ok(plan)
    }

    /// Plan with a single task.
    pub fn single(task: Task) -> Self {
        let mut task = task;
        task.depends_on.clear();
        Self { tasks: vec![task] }
    }

    /// Single llm task over `prompt`, used when planning fails.
    pub fn direct(prompt: impl Into<String>) -> Self {
        Self::single(Task::new("t1", CapabilityKind::Llm, prompt))
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task ids in plan order.
    pub fn ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    pub fn has_capability(&self, kind: CapabilityKind) -> bool {
        self.tasks.iter().any(|t| t.capability == kind)
    }

    /// Update the status of one task, enforcing the task lifecycle.
    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> crate::Result<()> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| crate::OrchestratorError::General(format!("unknown task '{}'", id)))?;
        task.update_status(status)
    }

    /// Kahn's algorithm; ties are broken by plan order. Tasks on a cycle are
    /// left out of the result.
    pub fn topological_order(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in &self.tasks {
            in_degree.insert(task.id.as_str(), task.depends_on.len());
            for dependency in &task.depends_on {
                dependents
                    .entry(dependency.as_str())
                    .or_default()
                    .push(task.id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = self
            .tasks
            .iter()
            .filter(|t| t.depends_on.is_empty())
            .map(|t| t.id.as_str())
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for dependent in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        order
    }

    /// All tasks that transitively depend on `id`.
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for task in &self.tasks {
                if task.depends_on.iter().any(|d| *d == current) && !found.contains(&task.id) {
                    found.push(task.id.clone());
                    frontier.push(task.id.clone());
                }
            }
        }
        found
    }
}
