use crate::audit::{AuditKind, AuditTrail};
use crate::graph::TaskDependencyGraph;
use crate::state::AgentStateManager;
use crate::types::{AgentState, AgentStatus, Task, TaskPriority, TaskStatus};
use cadence_core::{AgentId, CadenceError, CadenceResult, Severity, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Two agents working concurrently on tasks that need the same resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique conflict id, referenced by resolutions.
    pub id: Uuid,
    /// The two agents involved, in detection order.
    pub agents: (AgentId, AgentId),
    /// Their tasks, in the same order as `agents`.
    pub tasks: (TaskId, TaskId),
    /// Resources both tasks require, sorted.
    pub shared_resources: Vec<String>,
    /// Medium, or High from three shared resources up; one step higher
    /// when either task is critical.
    pub severity: Severity,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

/// Suggested action for an external actor to take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Hand `task_id` from `from_agent` to the idle `to_agent`.
    Reassign {
        /// The task to move.
        task_id: TaskId,
        /// Its current owner.
        from_agent: AgentId,
        /// The idle agent that should take it.
        to_agent: AgentId,
    },
}

/// A best-effort resolution for one detected conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// The conflict this resolves.
    pub conflict_id: Uuid,
    /// What should be done.
    pub action: ResolutionAction,
    /// Human-readable explanation.
    pub rationale: String,
}

/// Result of one coordination pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinationReport {
    /// Every conflicting pair found in this pass.
    pub conflicts_detected: Vec<ConflictRecord>,
    /// Suggestions only; a detected conflict may have no resolution yet.
    pub conflicts_resolved: Vec<ConflictResolution>,
}

/// Detects resource conflicts between agents and proposes reassignments.
///
/// Works on read snapshots of the graph and the agent table and never
/// mutates either.
pub struct CollaborationCoordinator {
    graph: Arc<TaskDependencyGraph>,
    agents: Arc<AgentStateManager>,
    audit: Arc<AuditTrail>,
}

impl CollaborationCoordinator {
    /// Coordinator over shared graph, agent table, and audit trail.
    pub fn new(
        graph: Arc<TaskDependencyGraph>,
        agents: Arc<AgentStateManager>,
        audit: Arc<AuditTrail>,
    ) -> Self {
        Self {
            graph,
            agents,
            audit,
        }
    }

    /// Detect pairwise resource conflicts among `agent_ids` and suggest
    /// moving the less important task of each pair to an idle agent.
    ///
    /// Each task and each receiver is used by at most one suggestion per
    /// pass. Fails with `NotFound` if any id is unregistered.
    pub async fn coordinate_agents(
        &self,
        agent_ids: &[AgentId],
    ) -> CadenceResult<CoordinationReport> {
        let states: HashMap<AgentId, AgentState> = self
            .agents
            .snapshot()
            .await
            .into_iter()
            .map(|s| (s.agent_id.clone(), s))
            .collect();
        for id in agent_ids {
            if !states.contains_key(id) {
                return Err(CadenceError::not_found("agent", id));
            }
        }
        let tasks = self.graph.snapshot();
        let now = self.agents.now();

        let wanted: HashSet<&AgentId> = agent_ids.iter().collect();
        let mut active: Vec<(&AgentId, &Task)> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .filter_map(|t| {
                let agent = t.assigned_agent.as_ref()?;
                wanted.contains(agent).then_some((agent, t))
            })
            .collect();
        active.sort_by(|a, b| a.0.cmp(b.0).then(a.1.created_at.cmp(&b.1.created_at)));

        let mut report = CoordinationReport::default();
        let busy: HashSet<&AgentId> = active.iter().map(|(a, _)| *a).collect();
        let mut claimed: HashSet<AgentId> = HashSet::new();
        let mut moved: HashSet<TaskId> = HashSet::new();

        for (i, (agent_a, task_a)) in active.iter().enumerate() {
            for (agent_b, task_b) in active.iter().skip(i + 1) {
                if agent_a == agent_b {
                    continue;
                }
                let shared = shared_resources(task_a, task_b);
                if shared.is_empty() {
                    continue;
                }

                let mut severity = if shared.len() >= 3 {
                    Severity::High
                } else {
                    Severity::Medium
                };
                if task_a.priority == TaskPriority::Critical
                    || task_b.priority == TaskPriority::Critical
                {
                    severity = severity.escalate();
                }
                let conflict = ConflictRecord {
                    id: Uuid::new_v4(),
                    agents: ((*agent_a).clone(), (*agent_b).clone()),
                    tasks: (task_a.id, task_b.id),
                    shared_resources: shared,
                    severity,
                    detected_at: now,
                };
                info!(
                    agent_a = %agent_a,
                    agent_b = %agent_b,
                    resources = ?conflict.shared_resources,
                    "Resource conflict detected"
                );
                self.audit.record(
                    None,
                    AuditKind::Conflict,
                    format!("{agent_a} and {agent_b} share resources"),
                    &conflict,
                );

                // Move the less important task; on a tie, the newer one.
                let (mover, moved_task) = if (task_b.priority, task_a.created_at)
                    <= (task_a.priority, task_b.created_at)
                {
                    (*agent_b, *task_b)
                } else {
                    (*agent_a, *task_a)
                };
                if moved.contains(&moved_task.id) {
                    debug!(
                        conflict_id = %conflict.id,
                        task_id = %moved_task.id,
                        "Task already has a reassignment this pass"
                    );
                    report.conflicts_detected.push(conflict);
                    continue;
                }
                let receiver = agent_ids.iter().find(|candidate| {
                    !busy.contains(candidate)
                        && !claimed.contains(*candidate)
                        && states.get(*candidate).is_some_and(|s| {
                            s.status == AgentStatus::Idle
                                && s.role
                                    .accepts(moved_task.required_specialization.as_deref())
                        })
                });

                match receiver {
                    Some(to_agent) => {
                        claimed.insert(to_agent.clone());
                        moved.insert(moved_task.id);
                        let resolution = ConflictResolution {
                            conflict_id: conflict.id,
                            action: ResolutionAction::Reassign {
                                task_id: moved_task.id,
                                from_agent: mover.clone(),
                                to_agent: to_agent.clone(),
                            },
                            rationale: format!(
                                "{to_agent} is idle and can take '{}' from {mover}",
                                moved_task.title
                            ),
                        };
                        self.audit.record(
                            None,
                            AuditKind::Resolution,
                            &resolution.rationale,
                            &resolution,
                        );
                        report.conflicts_resolved.push(resolution);
                    }
                    None => {
                        debug!(
                            conflict_id = %conflict.id,
                            "No idle agent available to resolve conflict"
                        );
                    }
                }
                report.conflicts_detected.push(conflict);
            }
        }

        Ok(report)
    }
}

fn shared_resources(a: &Task, b: &Task) -> Vec<String> {
    let left: BTreeSet<&String> = a.required_resources.iter().collect();
    b.required_resources
        .iter()
        .filter(|r| left.contains(r))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .cloned()
        .collect()
}
