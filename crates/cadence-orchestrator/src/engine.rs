use crate::audit::AuditTrail;
use crate::config::CoordinatorConfig;
use crate::coordination::CollaborationCoordinator;
use crate::decision::PoApprovalAnalysis;
use crate::decomposer::{materialize, TaskDecomposer};
use crate::escalation::{EscalationManager, EscalationRecord};
use crate::graph::TaskDependencyGraph;
use crate::profiles::default_roster;
use crate::progress::{ProgressAggregator, ProgressSummary};
use crate::state::{AgentStateManager, HealthReport};
use crate::types::{AgentRegistration, AgentState, AgentStatus, Task, TaskStatus};
use crate::virtual_time::{
    AnchoredClock, SimulatedClock, SprintOutcome, StandupReport, VirtualClock,
    VirtualTimeCoordinator,
};
use async_trait::async_trait;
use cadence_core::{AgentId, CadenceError, CadenceResult, Clock, TaskId};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// What happened to a task during one slice of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkStatus {
    /// Still working.
    InProgress,
    /// The task is done.
    Completed,
    /// The agent cannot continue until something outside it changes.
    Blocked {
        /// What the agent is waiting on.
        reason: String,
    },
    /// The task failed.
    Failed {
        /// Why it failed.
        reason: String,
    },
}

/// Result of one [`AgentWorker::work`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkReport {
    /// Progress on the task after the slice, in `[0, 1]`.
    pub progress: f64,
    /// Where the task stands.
    pub status: WorkStatus,
}

/// The agent process layer as seen by the runner: given an agent and its
/// task, do one slice of work and say how it went.
#[async_trait]
pub trait AgentWorker: Send + Sync {
    /// Work on `task` for `slice` of virtual time.
    async fn work(
        &self,
        agent: &AgentState,
        task: &Task,
        slice: Duration,
    ) -> CadenceResult<WorkReport>;
}

/// Deterministic stand-in for real agent processes.
///
/// A task advances by `slice / estimate` per call (one virtual day when the
/// task has no estimate). Tasks whose title contains a configured keyword
/// fail or block instead.
#[derive(Debug, Default)]
pub struct SimulatedWorker {
    progress: Mutex<HashMap<TaskId, f64>>,
    fail_on: Vec<String>,
    block_on: Vec<String>,
}

impl SimulatedWorker {
    /// Worker where every task succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail tasks whose title contains `keyword` (case-insensitive).
    pub fn failing_on(mut self, keyword: impl Into<String>) -> Self {
        self.fail_on.push(keyword.into().to_lowercase());
        self
    }

    /// Block tasks whose title contains `keyword` (case-insensitive).
    pub fn blocking_on(mut self, keyword: impl Into<String>) -> Self {
        self.block_on.push(keyword.into().to_lowercase());
        self
    }
}

#[async_trait]
impl AgentWorker for SimulatedWorker {
    async fn work(
        &self,
        _agent: &AgentState,
        task: &Task,
        slice: Duration,
    ) -> CadenceResult<WorkReport> {
        let title = task.title.to_lowercase();
        let mut progress = self.progress.lock();
        let done = progress.entry(task.id).or_insert(0.0);

        if let Some(k) = self.fail_on.iter().find(|k| title.contains(k.as_str())) {
            return Ok(WorkReport {
                progress: *done,
                status: WorkStatus::Failed {
                    reason: format!("simulated failure on '{k}'"),
                },
            });
        }
        if let Some(k) = self.block_on.iter().find(|k| title.contains(k.as_str())) {
            return Ok(WorkReport {
                progress: *done,
                status: WorkStatus::Blocked {
                    reason: format!("waiting on '{k}'"),
                },
            });
        }

        let estimate = task
            .estimated_duration
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(24 * 3600));
        *done = (*done + slice.as_secs_f64() / estimate.as_secs_f64()).min(1.0);
        let status = if *done >= 1.0 {
            WorkStatus::Completed
        } else {
            WorkStatus::InProgress
        };
        Ok(WorkReport {
            progress: *done,
            status,
        })
    }
}

/// Everything a caller needs to know after a sprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintReport {
    /// Assessment, final decision, and statistics.
    pub outcome: SprintOutcome,
    /// Progress just before the sprint concluded.
    pub progress: ProgressSummary,
    /// Agent health just before the sprint concluded.
    pub health: HealthReport,
    /// Approval view of the final decision.
    pub recommendation: PoApprovalAnalysis,
    /// Every escalation raised so far.
    pub escalations: Vec<EscalationRecord>,
    /// Conflicts found across all coordination passes.
    pub conflicts_detected: usize,
    /// Conflicts that got a resolution.
    pub conflicts_resolved: usize,
    /// Final state of every task in the graph.
    pub tasks: Vec<Task>,
}

/// The application loop around the orchestration core.
///
/// Implements plan → execute → conclude for one instruction: the plan is
/// decomposed into the graph, the roster works through it one standup
/// interval at a time, and the sprint ends with an assessment and a
/// continuation decision. Graph, agent table, and audit trail all follow
/// the runner's virtual clock.
pub struct SprintRunner {
    graph: Arc<TaskDependencyGraph>,
    agents: Arc<AgentStateManager>,
    audit: Arc<AuditTrail>,
    coordinator: VirtualTimeCoordinator,
    aggregator: ProgressAggregator,
    escalations: EscalationManager,
    collaboration: CollaborationCoordinator,
    decomposer: Arc<dyn TaskDecomposer>,
    worker: Arc<dyn AgentWorker>,
    roster: Vec<AgentRegistration>,
}

impl SprintRunner {
    /// Runner with its own graph, agent table, audit trail, and clock.
    pub fn new(
        config: CoordinatorConfig,
        decomposer: Arc<dyn TaskDecomposer>,
        worker: Arc<dyn AgentWorker>,
    ) -> CadenceResult<Self> {
        config.validate()?;

        let virtual_clock = Arc::new(SimulatedClock::new());
        let wall: Arc<dyn Clock> = Arc::new(AnchoredClock::new(Utc::now(), virtual_clock.clone()));
        let graph = Arc::new(TaskDependencyGraph::with_clock(wall.clone()));
        let agents = Arc::new(
            AgentStateManager::with_clock(wall.clone())
                .with_stale_after(config.monitoring.stale_after()),
        );
        let audit = Arc::new(AuditTrail::with_clock(wall));

        let sprint_clock = virtual_clock.clone();
        let coordinator =
            VirtualTimeCoordinator::new(graph.clone(), agents.clone(), audit.clone(), &config)
                .with_clock_factory(Arc::new(move |_: &str| {
                    sprint_clock.clone() as Arc<dyn VirtualClock>
                }));

        Ok(Self {
            aggregator: ProgressAggregator::new(graph.clone(), agents.clone())
                .with_health_timeout(config.monitoring.health_check_timeout()),
            escalations: EscalationManager::new(
                graph.clone(),
                agents.clone(),
                audit.clone(),
                config.monitoring.clone(),
            ),
            collaboration: CollaborationCoordinator::new(
                graph.clone(),
                agents.clone(),
                audit.clone(),
            ),
            roster: default_roster(Path::new(".")),
            graph,
            agents,
            audit,
            coordinator,
            decomposer,
            worker,
        })
    }

    /// Replace the default eight-agent roster.
    pub fn with_roster(mut self, roster: Vec<AgentRegistration>) -> Self {
        self.roster = roster;
        self
    }

    /// Stream the audit trail to `<dir>/audit.jsonl`.
    pub fn with_audit_dir(self, dir: PathBuf) -> Self {
        self.audit.attach_file_sink(dir);
        self
    }

    /// Shared task graph.
    pub fn graph(&self) -> &Arc<TaskDependencyGraph> {
        &self.graph
    }

    /// Shared agent table.
    pub fn agents(&self) -> &Arc<AgentStateManager> {
        &self.agents
    }

    /// Shared audit trail.
    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    /// The sprint lifecycle coordinator.
    pub fn coordinator(&self) -> &VirtualTimeCoordinator {
        &self.coordinator
    }

    /// Run one sprint for `instruction`.
    pub async fn run(&self, sprint_id: &str, instruction: &str) -> CadenceResult<SprintReport> {
        info!(sprint_id = %sprint_id, instruction = %instruction, "Sprint runner: starting");

        // Plan
        let plan = self.decomposer.decompose(instruction).await?;
        let planned = materialize(&self.graph, &plan)?;
        info!(sprint_id = %sprint_id, tasks = planned.len(), "Sprint runner: plan complete");

        self.register_roster().await?;
        self.coordinator.start_sprint(sprint_id).await?;

        // Execute
        let interval = self.coordinator.calculator().standup_interval();
        let agent_ids = self.agents.agent_ids().await;
        let mut conflicts_detected = 0;
        let mut conflicts_resolved = 0;
        loop {
            self.assign_ready_tasks().await?;
            if self.graph.count_with_status(TaskStatus::InProgress) == 0 {
                info!(sprint_id = %sprint_id, "Sprint runner: no work left");
                break;
            }

            let advanced = self.coordinator.advance_time(sprint_id, interval).await?;
            let blockers = self.work_slice(interval).await?;
            let reports = self.standup_reports(&blockers).await;
            self.coordinator.execute_standup(sprint_id, reports).await?;

            self.escalations.check().await;
            let coordination = self.collaboration.coordinate_agents(&agent_ids).await?;
            conflicts_detected += coordination.conflicts_detected.len();
            conflicts_resolved += coordination.conflicts_resolved.len();

            self.recover_errored_agents().await?;

            if advanced.sprint_over {
                info!(
                    sprint_id = %sprint_id,
                    at = %advanced.now,
                    "Sprint runner: time box reached"
                );
                break;
            }
        }

        // Conclude
        let progress = self.aggregator.get_progress_summary().await;
        let health = self.aggregator.health().await;
        let outcome = self.coordinator.conclude_sprint(sprint_id).await?;
        let recommendation =
            PoApprovalAnalysis::for_decision(&outcome.decision, &outcome.assessment);

        info!(
            sprint_id = %sprint_id,
            decision = outcome.decision.kind(),
            completed = outcome.assessment.tasks_completed,
            total = outcome.assessment.tasks_total,
            "Sprint runner: sprint concluded"
        );

        Ok(SprintReport {
            outcome,
            progress,
            health,
            recommendation,
            escalations: self.escalations.history(),
            conflicts_detected,
            conflicts_resolved,
            tasks: self.graph.snapshot(),
        })
    }

    /// Flush the audit trail.
    pub async fn shutdown(&self) -> CadenceResult<()> {
        self.audit.close().await
    }

    /// Register the roster concurrently unless agents are already present.
    async fn register_roster(&self) -> CadenceResult<()> {
        if self.agents.agent_count().await > 0 {
            return Ok(());
        }
        let mut set = JoinSet::new();
        for registration in self.roster.iter().cloned() {
            let agents = self.agents.clone();
            set.spawn(async move { agents.add_agent(registration).await });
        }
        while let Some(joined) = set.join_next().await {
            joined.map_err(|e| CadenceError::Io(std::io::Error::other(e.to_string())))??;
        }
        Ok(())
    }

    /// Hand executable tasks, most important first, to idle agents whose
    /// role matches the task's specialization.
    async fn assign_ready_tasks(&self) -> CadenceResult<()> {
        let mut idle: Vec<AgentState> = self
            .agents
            .snapshot()
            .await
            .into_iter()
            .filter(|a| a.status == AgentStatus::Idle && a.current_task.is_none())
            .collect();

        let mut ready = self.graph.get_executable_tasks();
        ready.sort_by_key(|t| Reverse(t.priority));
        for task in ready {
            let Some(pos) = idle
                .iter()
                .position(|a| a.role.accepts(task.required_specialization.as_deref()))
            else {
                continue;
            };
            let agent = idle.remove(pos);
            self.graph.assign(task.id, Some(agent.agent_id.clone()))?;
            self.graph.update_status(task.id, TaskStatus::InProgress)?;
            self.agents.assign_task(&agent.agent_id, task.id).await?;
        }
        Ok(())
    }

    /// Let every busy agent work for `slice` and apply the results.
    /// Returns the blockers each agent raised.
    async fn work_slice(&self, slice: Duration) -> CadenceResult<HashMap<AgentId, Vec<String>>> {
        let mut blockers: HashMap<AgentId, Vec<String>> = HashMap::new();
        for agent in self.agents.snapshot().await {
            let Some(task) = agent.current_task.and_then(|id| self.graph.get(id)) else {
                continue;
            };
            let report = match self.worker.work(&agent, &task, slice).await {
                Ok(report) => report,
                Err(e) => {
                    error!(
                        agent_id = %agent.agent_id,
                        task_id = %task.id,
                        error = %e,
                        "Worker failed"
                    );
                    WorkReport {
                        progress: agent.progress,
                        status: WorkStatus::Failed {
                            reason: e.to_string(),
                        },
                    }
                }
            };
            let progress = if report.progress.is_finite() {
                report.progress.clamp(0.0, 1.0)
            } else {
                agent.progress
            };

            match report.status {
                WorkStatus::InProgress => {
                    self.agents
                        .report(&agent.agent_id, progress, AgentStatus::Working)
                        .await?;
                }
                WorkStatus::Completed => {
                    self.graph.update_status(task.id, TaskStatus::Completed)?;
                    self.agents
                        .report(&agent.agent_id, 1.0, AgentStatus::Working)
                        .await?;
                    self.agents.finish_task(&agent.agent_id).await?;
                    info!(agent_id = %agent.agent_id, task = %task.title, "Task completed");
                }
                WorkStatus::Blocked { reason } => {
                    self.agents
                        .report(&agent.agent_id, progress, AgentStatus::Blocked)
                        .await?;
                    blockers.entry(agent.agent_id.clone()).or_default().push(reason);
                }
                WorkStatus::Failed { reason } => {
                    self.graph.update_status(task.id, TaskStatus::Failed)?;
                    self.agents
                        .report(&agent.agent_id, progress, AgentStatus::Error)
                        .await?;
                    warn!(
                        agent_id = %agent.agent_id,
                        task = %task.title,
                        reason = %reason,
                        "Task failed"
                    );
                    blockers.entry(agent.agent_id.clone()).or_default().push(reason);
                }
            }
        }
        Ok(blockers)
    }

    async fn standup_reports(
        &self,
        blockers: &HashMap<AgentId, Vec<String>>,
    ) -> Vec<StandupReport> {
        let mut reports = Vec::new();
        for agent in self.agents.snapshot().await {
            let summary = match agent.current_task.and_then(|id| self.graph.get(id)) {
                Some(task) => format!("working on '{}'", task.title),
                None => "available".to_string(),
            };
            let mut report =
                StandupReport::new(agent.agent_id.clone(), agent.progress, agent.status)
                    .with_summary(summary);
            for blocker in blockers.get(&agent.agent_id).into_iter().flatten() {
                report = report.with_blocker(blocker.clone());
            }
            reports.push(report);
        }
        reports
    }

    /// The project manager takes agents whose task failed off that task so
    /// they can pick up new work.
    async fn recover_errored_agents(&self) -> CadenceResult<()> {
        for agent in self.agents.snapshot().await {
            if agent.status == AgentStatus::Error {
                self.agents.finish_task(&agent.agent_id).await?;
                info!(agent_id = %agent.agent_id, "Agent released after failed task");
            }
        }
        Ok(())
    }
}
