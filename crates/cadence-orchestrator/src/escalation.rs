use crate::audit::{AuditKind, AuditTrail};
use crate::config::MonitoringConfig;
use crate::graph::TaskDependencyGraph;
use crate::state::AgentStateManager;
use crate::types::{AgentStatus, TaskPriority};
use cadence_core::{AgentId, Severity, TaskId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Why an escalation was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationCause {
    /// Agent sat in `Blocked` longer than the threshold.
    AgentBlocked {
        /// When the agent became blocked.
        since: DateTime<Utc>,
    },
    /// Agent sat in `Error` longer than the threshold.
    AgentError {
        /// When the agent entered `Error`.
        since: DateTime<Utc>,
    },
    /// A pending task's hard prerequisite failed or was cancelled.
    UnresolvableDependency {
        /// The direct prerequisite on the dead path.
        blocked_by: TaskId,
    },
}

/// Point-in-time escalation finding. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// Unique escalation id.
    pub id: Uuid,
    /// Agent concerned, if any.
    pub agent_id: Option<AgentId>,
    /// Task concerned, if any.
    pub task_id: Option<TaskId>,
    /// Why it was raised.
    pub cause: EscalationCause,
    /// How urgent it is.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// When it was raised.
    pub created_at: DateTime<Utc>,
    /// When a human should have responded by.
    pub deadline: Option<DateTime<Utc>>,
}

/// Watches agent and task state for situations a human (or the PM agent)
/// has to resolve. Read-only with respect to the graph and agent table.
pub struct EscalationManager {
    graph: Arc<TaskDependencyGraph>,
    agents: Arc<AgentStateManager>,
    audit: Arc<AuditTrail>,
    config: MonitoringConfig,
    raised: Mutex<HashSet<String>>,
    history: Mutex<Vec<EscalationRecord>>,
}

impl EscalationManager {
    /// Manager over shared state, reporting to `audit`.
    pub fn new(
        graph: Arc<TaskDependencyGraph>,
        agents: Arc<AgentStateManager>,
        audit: Arc<AuditTrail>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            graph,
            agents,
            audit,
            config,
            raised: Mutex::new(HashSet::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Scan for new escalations. A condition already escalated is not
    /// raised again until it changes (e.g. the agent leaves and re-enters
    /// `Blocked`).
    pub async fn check(&self) -> Vec<EscalationRecord> {
        let now = self.agents.now();
        let threshold = self.config.escalate_after();
        let mut found = Vec::new();

        for state in self.agents.snapshot().await {
            let (cause, base) = match state.status {
                AgentStatus::Blocked => (
                    EscalationCause::AgentBlocked {
                        since: state.status_since,
                    },
                    Severity::Medium,
                ),
                AgentStatus::Error => (
                    EscalationCause::AgentError {
                        since: state.status_since,
                    },
                    Severity::High,
                ),
                _ => continue,
            };
            let stuck_for = now - state.status_since;
            if stuck_for <= threshold {
                continue;
            }
            let severity = if stuck_for > threshold * 2 {
                base.escalate()
            } else {
                base
            };
            let key = format!("agent:{}:{:?}", state.agent_id, cause);
            let message = format!(
                "{} has been {:?} for {} min",
                state.agent_id,
                state.status,
                stuck_for.num_minutes()
            );
            found.push((
                key,
                Some(state.agent_id.clone()),
                state.current_task,
                cause,
                severity,
                message,
            ));
        }

        for dead in self.graph.unresolvable_tasks() {
            let task = self.graph.get(dead.task_id);
            let severity = match task.as_ref().map(|t| t.priority) {
                Some(TaskPriority::Critical) => Severity::Critical,
                _ => Severity::High,
            };
            let title = task.as_ref().map(|t| t.title.as_str()).unwrap_or("?");
            found.push((
                format!("task:{}:{}", dead.task_id, dead.blocked_by),
                task.as_ref().and_then(|t| t.assigned_agent.clone()),
                Some(dead.task_id),
                EscalationCause::UnresolvableDependency {
                    blocked_by: dead.blocked_by,
                },
                severity,
                format!(
                    "task '{title}' can never run: prerequisite {} failed or was cancelled",
                    dead.blocked_by
                ),
            ));
        }

        let mut raised = Vec::new();
        for (key, agent_id, task_id, cause, severity, message) in found {
            if !self.raised.lock().insert(key) {
                continue;
            }
            let record = EscalationRecord {
                id: Uuid::new_v4(),
                agent_id,
                task_id,
                cause,
                severity,
                message,
                created_at: now,
                deadline: self
                    .config
                    .response_windows
                    .window_for(severity)
                    .map(|w| now + w),
            };
            warn!(
                agent_id = ?record.agent_id,
                task_id = ?record.task_id,
                severity = %record.severity,
                "Escalation raised: {}",
                record.message
            );
            self.audit
                .record(None, AuditKind::Escalation, &record.message, &record);
            self.history.lock().push(record.clone());
            raised.push(record);
        }
        raised
    }

    /// Every escalation raised so far, oldest first.
    pub fn history(&self) -> Vec<EscalationRecord> {
        self.history.lock().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{AgentRegistration, AgentRole, DependencyKind, Task, TaskStatus};
    use cadence_core::ManualClock;

    struct Fixture {
        clock: Arc<ManualClock>,
        graph: Arc<TaskDependencyGraph>,
        agents: Arc<AgentStateManager>,
        audit: Arc<AuditTrail>,
        manager: EscalationManager,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let graph = Arc::new(TaskDependencyGraph::with_clock(clock.clone()));
        let agents = Arc::new(AgentStateManager::with_clock(clock.clone()));
        let audit = Arc::new(AuditTrail::with_clock(clock.clone()));
        agents
            .add_agent(AgentRegistration::new("developer-1", AgentRole::Developer))
            .await
            .unwrap();
        let config = MonitoringConfig {
            escalate_after_secs: 600,
            ..MonitoringConfig::default()
        };
        let manager =
            EscalationManager::new(graph.clone(), agents.clone(), audit.clone(), config);
        Fixture {
            clock,
            graph,
            agents,
            audit,
            manager,
        }
    }

    #[tokio::test]
    async fn test_blocked_agent_escalates_after_threshold() {
        let f = fixture().await;
        f.agents
            .update_agent_status("developer-1", AgentStatus::Blocked)
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::minutes(5));
        assert!(f.manager.check().await.is_empty());

        f.clock.advance(chrono::Duration::minutes(6));
        let raised = f.manager.check().await;
        assert_eq!(raised.len(), 1);
        let record = &raised[0];
        assert_eq!(record.agent_id.as_deref(), Some("developer-1"));
        assert!(matches!(record.cause, EscalationCause::AgentBlocked { .. }));
        assert_eq!(record.severity, Severity::Medium);
        assert_eq!(
            record.deadline,
            Some(record.created_at + chrono::Duration::hours(24))
        );
        assert_eq!(f.audit.entries_of(AuditKind::Escalation).len(), 1);
    }

    #[tokio::test]
    async fn test_same_condition_not_raised_twice() {
        let f = fixture().await;
        f.agents
            .update_agent_status("developer-1", AgentStatus::Error)
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::minutes(15));
        assert_eq!(f.manager.check().await.len(), 1);
        f.clock.advance(chrono::Duration::minutes(15));
        assert!(f.manager.check().await.is_empty());
        assert_eq!(f.manager.history().len(), 1);
    }

    #[tokio::test]
    async fn test_long_error_escalates_severity() {
        let f = fixture().await;
        f.agents
            .update_agent_status("developer-1", AgentStatus::Error)
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::minutes(30));
        let raised = f.manager.check().await;
        assert_eq!(raised[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_unresolvable_dependency_escalates() {
        let f = fixture().await;
        let schema = f
            .graph
            .add_task(Task::new("Schema", TaskPriority::High))
            .unwrap();
        let api = f
            .graph
            .add_task(Task::new("API", TaskPriority::Critical).assigned_to("developer-1"))
            .unwrap();
        f.graph
            .add_dependency(api, schema, DependencyKind::Hard)
            .unwrap();
        f.graph.update_status(schema, TaskStatus::Failed).unwrap();

        let raised = f.manager.check().await;
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].task_id, Some(api));
        assert_eq!(raised[0].severity, Severity::Critical);
        assert_eq!(
            raised[0].cause,
            EscalationCause::UnresolvableDependency { blocked_by: schema }
        );
        // Read-only: the dependent task is untouched.
        assert_eq!(f.graph.get(api).unwrap().status, TaskStatus::Pending);
    }
}
