use crate::graph::TaskDependencyGraph;
use crate::types::{AgentRole, DependencyKind, Task, TaskPriority};
use async_trait::async_trait;
use cadence_core::{CadenceError, CadenceResult, TaskId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// A task produced by decomposition, not yet in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    /// Short task title.
    pub title: String,
    /// What has to be done.
    pub description: String,
    /// Task priority.
    pub priority: TaskPriority,
    /// Specialization tag that selects which role may take the task.
    pub specialization: String,
    /// Resources the task touches.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Expected virtual duration.
    pub estimate: Option<Duration>,
    /// Indexes of earlier tasks in the same plan this one hard-depends on.
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

impl PlannedTask {
    fn to_task(&self) -> Task {
        let mut task = Task::new(self.title.clone(), self.priority)
            .with_description(self.description.clone())
            .with_resources(self.resources.iter().cloned())
            .with_specialization(self.specialization.clone());
        if let Some(estimate) = self.estimate {
            task = task.with_estimate(estimate);
        }
        task
    }
}

/// Turns a free-form instruction into an ordered task plan.
///
/// Implementations may be slow (classification, remote calls); the caller
/// awaits them before touching the graph.
#[async_trait]
pub trait TaskDecomposer: Send + Sync {
    /// Turn an instruction into an ordered plan.
    async fn decompose(&self, instruction: &str) -> CadenceResult<Vec<PlannedTask>>;
}

/// Insert a plan into the graph, wiring `depends_on` as hard edges.
///
/// The whole plan is checked before anything is inserted; references to
/// the task itself or to later tasks are a `Validation` error.
pub fn materialize(
    graph: &TaskDependencyGraph,
    plan: &[PlannedTask],
) -> CadenceResult<Vec<TaskId>> {
    for (i, planned) in plan.iter().enumerate() {
        if let Some(bad) = planned.depends_on.iter().find(|d| **d >= i) {
            return Err(CadenceError::Validation(format!(
                "task {i} ('{}') depends on task {bad}, which does not precede it",
                planned.title
            )));
        }
    }

    let mut ids = Vec::with_capacity(plan.len());
    for planned in plan {
        let id = graph.add_task(planned.to_task())?;
        for dep in &planned.depends_on {
            graph.add_dependency(id, ids[*dep], DependencyKind::Hard)?;
        }
        ids.push(id);
    }
    Ok(ids)
}

const ONE_DAY: Duration = Duration::from_secs(24 * 3600);

/// Rule-based decomposer.
///
/// Splits the instruction into features (on `;`, `,` and " and "), and
/// gives every feature a design → implement → test → review chain. UI
/// work gets a design step from the UX designer; everything else starts
/// at implementation.
#[derive(Debug, Clone, Default)]
pub struct KeywordDecomposer;

impl KeywordDecomposer {
    /// Decomposer with the built-in keyword table.
    pub fn new() -> Self {
        Self
    }

    fn features(instruction: &str) -> Vec<String> {
        instruction
            .replace(" and ", ";")
            .split([';', ',', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn priority_of(feature: &str) -> TaskPriority {
        let lower = feature.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
        if has(&["security", "auth", "login", "payment", "data loss", "outage"]) {
            TaskPriority::Critical
        } else if has(&["optional", "nice to have", "someday"]) {
            TaskPriority::Low
        } else if has(&["docs", "documentation", "cleanup", "refactor", "polish"]) {
            TaskPriority::Medium
        } else {
            TaskPriority::High
        }
    }

    fn resources_of(feature: &str) -> Vec<String> {
        let lower = feature.to_lowercase();
        let mut resources = Vec::new();
        for (words, resource) in [
            (&["database", "db", "schema", "migration"][..], "database"),
            (&["api", "endpoint", "backend"][..], "api"),
            (&["ui", "page", "screen", "form", "dashboard", "frontend"][..], "frontend"),
            (&["auth", "login", "session"][..], "auth"),
        ] {
            if lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|token| words.contains(&token))
            {
                resources.push(resource.to_string());
            }
        }
        resources
    }

    fn needs_design(resources: &[String]) -> bool {
        resources.iter().any(|r| r == "frontend")
    }
}

#[async_trait]
impl TaskDecomposer for KeywordDecomposer {
    async fn decompose(&self, instruction: &str) -> CadenceResult<Vec<PlannedTask>> {
        let features = Self::features(instruction);
        if features.is_empty() {
            return Err(CadenceError::Validation(
                "instruction contains no work".to_string(),
            ));
        }

        let mut plan: Vec<PlannedTask> = Vec::new();
        for feature in &features {
            let priority = Self::priority_of(feature);
            let resources = Self::resources_of(feature);
            let mut step = |title: String, role: AgentRole, days: f64, deps: Vec<usize>| {
                plan.push(PlannedTask {
                    description: format!("{title} ({feature})"),
                    title,
                    priority,
                    specialization: role.specialization().to_string(),
                    resources: resources.clone(),
                    estimate: Some(ONE_DAY.mul_f64(days)),
                    depends_on: deps,
                });
                plan.len() - 1
            };

            let design = Self::needs_design(&resources)
                .then(|| step(format!("Design: {feature}"), AgentRole::UxDesigner, 1.0, vec![]));
            let implement = step(
                format!("Implement: {feature}"),
                AgentRole::Developer,
                3.0,
                design.into_iter().collect(),
            );
            let test = step(
                format!("Test: {feature}"),
                AgentRole::Qa,
                1.0,
                vec![implement],
            );
            step(
                format!("Review: {feature}"),
                AgentRole::ProjectManager,
                0.5,
                vec![implement, test],
            );
        }

        info!(features = features.len(), tasks = plan.len(), "Instruction decomposed");
        Ok(plan)
    }
}
