use cadence_core::{AgentId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Role of each agent in the fixed development roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Implements features.
    Developer,
    /// Writes and runs tests.
    Qa,
    /// Produces designs and reviews usability.
    UxDesigner,
    /// Plans, reviews, and coordinates the other agents.
    ProjectManager,
}

impl AgentRole {
    /// Specialization tag this role accepts on decomposed tasks.
    pub fn specialization(&self) -> &'static str {
        match self {
            AgentRole::Developer => "Development",
            AgentRole::Qa => "Testing",
            AgentRole::UxDesigner => "UXDesign",
            AgentRole::ProjectManager => "ProjectManagement",
        }
    }

    /// Whether this role can pick up a task with the given specialization tag.
    /// Untagged tasks can be taken by anyone.
    pub fn accepts(&self, specialization: Option<&str>) -> bool {
        match specialization {
            None => true,
            Some(tag) => tag.eq_ignore_ascii_case(self.specialization()),
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Developer => write!(f, "developer"),
            AgentRole::Qa => write!(f, "qa"),
            AgentRole::UxDesigner => write!(f, "ux_designer"),
            AgentRole::ProjectManager => write!(f, "project_manager"),
        }
    }
}

/// Status of a task in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting to be picked up.
    Pending,
    /// Assigned and being worked on.
    InProgress,
    /// Done. Final.
    Completed,
    /// Failed; may be retried.
    Failed,
    /// Dropped. Final.
    Cancelled,
}

impl TaskStatus {
    /// Completed and cancelled tasks never change status again.
    pub fn is_final(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

/// Task priority; also selects the quality weight of a completed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    /// Nice to have.
    Low,
    /// Normal work.
    Medium,
    /// Important work.
    High,
    /// Blocks the sprint goal.
    Critical,
}

/// Whether a dependency blocks execution or is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyKind {
    /// The dependent task cannot start until the prerequisite is completed.
    Hard,
    /// Ordering hint only.
    Soft,
}

/// A directed edge: `from` depends on `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// The dependent task.
    pub from: TaskId,
    /// The prerequisite.
    pub to: TaskId,
    /// Hard or soft.
    pub kind: DependencyKind,
}

/// A unit of work owned by the task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: TaskId,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Current status; only the graph changes it.
    pub status: TaskStatus,
    /// Agent working on the task, if any.
    pub assigned_agent: Option<AgentId>,
    /// Priority; also the quality weight once completed.
    pub priority: TaskPriority,
    /// Expected virtual duration.
    pub estimated_duration: Option<Duration>,
    /// Time between start and completion.
    pub actual_duration: Option<Duration>,
    /// Resources the task touches; overlaps are conflicts.
    #[serde(default)]
    pub required_resources: Vec<String>,
    /// Opaque specialization tag from instruction decomposition
    /// (`Development`, `Testing`, `UXDesign`, `ProjectManagement`).
    #[serde(default)]
    pub required_specialization: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status or assignment change.
    pub updated_at: DateTime<Utc>,
    /// When the task entered `InProgress`.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A pending, unassigned task.
    pub fn new(title: impl Into<String>, priority: TaskPriority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            assigned_agent: None,
            priority,
            estimated_duration: None,
            actual_duration: None,
            required_resources: Vec::new(),
            required_specialization: None,
            created_at: now,
            updated_at: now,
            started_at: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the required resources.
    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_resources = resources.into_iter().map(Into::into).collect();
        self
    }

    /// Set the specialization tag.
    pub fn with_specialization(mut self, tag: impl Into<String>) -> Self {
        self.required_specialization = Some(tag.into());
        self
    }

    /// Set the estimated duration.
    pub fn with_estimate(mut self, estimate: Duration) -> Self {
        self.estimated_duration = Some(estimate);
        self
    }

    /// Start from the given status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Start assigned to `agent`.
    pub fn assigned_to(mut self, agent: impl Into<AgentId>) -> Self {
        self.assigned_agent = Some(agent.into());
        self
    }
}

/// Status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Registered, no work.
    Idle,
    /// Working on its current task.
    Working,
    /// Waiting on something outside the agent.
    Blocked,
    /// Its last task failed.
    Error,
    /// Finished for good; no further work.
    Completed,
}

impl AgentStatus {
    /// `Completed` and `Error` agents no longer count as active.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Error)
    }
}

/// Mutable record kept for every registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Unique agent id.
    pub agent_id: AgentId,
    /// Role; decides which tasks the agent may take.
    pub role: AgentRole,
    /// Current status.
    pub status: AgentStatus,
    /// Fraction of the current assignment done, in `[0, 1]`.
    pub progress: f64,
    /// Last time anything about the agent changed.
    pub last_update: DateTime<Utc>,
    /// When `status` last changed.
    pub status_since: DateTime<Utc>,
    /// Task being worked on, if any.
    pub current_task: Option<TaskId>,
    /// Directory the agent works in.
    pub working_directory: PathBuf,
    /// OS process backing the agent, if known.
    pub process_id: Option<u32>,
}

/// Data needed to register an agent with the state manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    /// Id to register under; must be unique.
    pub agent_id: AgentId,
    /// Role of the new agent.
    pub role: AgentRole,
    /// Directory the agent works in.
    pub working_directory: PathBuf,
    /// OS process backing the agent, if already spawned.
    pub process_id: Option<u32>,
}

impl AgentRegistration {
    /// Registration working in the current directory.
    pub fn new(agent_id: impl Into<AgentId>, role: AgentRole) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            working_directory: PathBuf::from("."),
            process_id: None,
        }
    }

    /// Set the working directory.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    /// Set the backing process id.
    pub fn with_process_id(mut self, pid: u32) -> Self {
        self.process_id = Some(pid);
        self
    }
}
