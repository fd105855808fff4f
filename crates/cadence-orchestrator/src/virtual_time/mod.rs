//! Virtual sprint clock.
//!
//! A [`VirtualTimeCoordinator`] owns one [`VirtualClock`] per sprint and
//! drives the sprint through `Active → Stopped`: time only moves through
//! it, standups are held through its [`MeetingScheduler`], and at the end
//! it runs the completion assessment and the continuation decision.

/// Virtual timeline arithmetic.
pub mod calculator;
/// Virtual clocks.
pub mod clock;
/// Sprint event log.
pub mod events;
/// Standup validation.
pub mod meetings;

pub use calculator::TimeCalculator;
pub use clock::{AnchoredClock, ClockFactory, SimulatedClock, VirtualClock, VirtualInstant};
pub use events::{EventProcessor, SprintEvent, SprintEventKind};
pub use meetings::{MeetingRecord, MeetingScheduler, StandupReport};

use crate::assessment::{CompletionAssessment, CompletionAssessmentManager};
use crate::audit::{AuditKind, AuditTrail};
use crate::config::CoordinatorConfig;
use crate::decision::{AutoContinuationPolicy, ContinuationDecision};
use crate::graph::TaskDependencyGraph;
use crate::state::AgentStateManager;
use crate::types::AgentStatus;
use cadence_core::{CadenceError, CadenceResult, Clock, SprintId, SystemClock, TaskId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Lifecycle of one sprint. There is no way back from `Stopped`; a new
/// sprint with the same id replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SprintState {
    /// Time may move and standups may be held.
    Active,
    /// Read-only.
    Stopped,
}

/// One entry of [`VirtualTimeCoordinator::get_sprint_statistics`].
///
/// Entries always come in the declaration order below; the assessment
/// entries only appear once the sprint was assessed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Metric", content = "Value")]
pub enum SprintMetric {
    /// The sprint's id.
    SprintId(SprintId),
    /// Whether the sprint is still active.
    IsActive(bool),
    /// Virtual seconds since the sprint started.
    VirtualElapsedSecs(u64),
    /// Standups held so far.
    StandupsHeld(usize),
    /// Entries in the sprint's event log.
    EventsProcessed(usize),
    /// Overall completion rate of the last assessment.
    CompletionRate(f64),
    /// Quality score of the last assessment.
    QualityScore(f64),
    /// The continuation decision, once made.
    Decision(ContinuationDecision),
}

/// Where a sprint stands after its clock moved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdvanceOutcome {
    /// Position on the sprint's timeline after the move.
    pub now: VirtualInstant,
    /// Standups whose scheduled time has passed but that were not held yet.
    pub standups_due: u32,
    /// The time box has been reached.
    pub sprint_over: bool,
}

/// Result of [`VirtualTimeCoordinator::conclude_sprint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprintOutcome {
    /// The concluded sprint.
    pub sprint_id: SprintId,
    /// Assessment over every task in the graph.
    pub assessment: CompletionAssessment,
    /// Decision after the auto-continuation cap was applied.
    pub decision: ContinuationDecision,
    /// Statistics of the now stopped sprint.
    pub statistics: Vec<SprintMetric>,
}

struct SprintContext {
    state: SprintState,
    clock: Arc<dyn VirtualClock>,
    started_at: VirtualInstant,
    events: EventProcessor,
    standups: Vec<MeetingRecord>,
    assessment: Option<CompletionAssessment>,
    decision: Option<ContinuationDecision>,
    last_wall_sync: DateTime<Utc>,
}

impl SprintContext {
    /// Position on the sprint's own timeline, starting at zero.
    fn position(&self) -> VirtualInstant {
        VirtualInstant::ZERO + self.clock.now().saturating_since(self.started_at)
    }

    fn metrics(&self, sprint_id: &str) -> Vec<SprintMetric> {
        let mut metrics = vec![
            SprintMetric::SprintId(sprint_id.to_string()),
            SprintMetric::IsActive(self.state == SprintState::Active),
            SprintMetric::VirtualElapsedSecs(self.position().elapsed().as_secs()),
            SprintMetric::StandupsHeld(self.standups.len()),
            SprintMetric::EventsProcessed(self.events.processed()),
        ];
        if let Some(a) = &self.assessment {
            metrics.push(SprintMetric::CompletionRate(a.overall_completion_rate));
            metrics.push(SprintMetric::QualityScore(a.quality_score));
        }
        if let Some(d) = &self.decision {
            metrics.push(SprintMetric::Decision(d.clone()));
        }
        metrics
    }

    fn record_assessment(&mut self, assessment: &CompletionAssessment) {
        let at = self.position();
        self.events.process(
            at,
            SprintEventKind::Assessed {
                completion_rate: assessment.overall_completion_rate,
                quality_score: assessment.quality_score,
            },
        );
        self.assessment = Some(assessment.clone());
    }

    fn stop(&mut self) {
        let at = self.position();
        self.state = SprintState::Stopped;
        self.events.process(at, SprintEventKind::Stopped);
    }
}

fn active<'a>(
    sprints: &'a HashMap<SprintId, SprintContext>,
    sprint_id: &str,
) -> CadenceResult<&'a SprintContext> {
    match sprints.get(sprint_id) {
        None => Err(CadenceError::not_found("sprint", sprint_id)),
        Some(ctx) if ctx.state != SprintState::Active => {
            Err(CadenceError::SprintNotActive(sprint_id.to_string()))
        }
        Some(ctx) => Ok(ctx),
    }
}

fn active_mut<'a>(
    sprints: &'a mut HashMap<SprintId, SprintContext>,
    sprint_id: &str,
) -> CadenceResult<&'a mut SprintContext> {
    match sprints.get_mut(sprint_id) {
        None => Err(CadenceError::not_found("sprint", sprint_id)),
        Some(ctx) if ctx.state != SprintState::Active => {
            Err(CadenceError::SprintNotActive(sprint_id.to_string()))
        }
        Some(ctx) => Ok(ctx),
    }
}

/// Runs virtual sprints over a shared task graph and agent table.
///
/// The sprint registry sits behind its own lock. Every call that changes
/// anything checks the sprint and applies all of its effects under one
/// registry write lock, so a concurrent stop either happens first (and the
/// call fails with `SprintNotActive` having changed nothing) or after.
/// Lock order is registry, then agent table, then policy.
pub struct VirtualTimeCoordinator {
    graph: Arc<TaskDependencyGraph>,
    agents: Arc<AgentStateManager>,
    audit: Arc<AuditTrail>,
    assessor: CompletionAssessmentManager,
    policy: Mutex<AutoContinuationPolicy>,
    calculator: TimeCalculator,
    meetings: MeetingScheduler,
    criteria: Vec<String>,
    sprints: RwLock<HashMap<SprintId, SprintContext>>,
    clock_factory: ClockFactory,
    wall_clock: Arc<dyn Clock>,
}

impl VirtualTimeCoordinator {
    /// Coordinator over shared graph, agent table, and audit trail.
    pub fn new(
        graph: Arc<TaskDependencyGraph>,
        agents: Arc<AgentStateManager>,
        audit: Arc<AuditTrail>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            graph,
            agents,
            audit,
            assessor: CompletionAssessmentManager::new(config.quality.clone()),
            policy: Mutex::new(AutoContinuationPolicy::from_config(config)),
            calculator: TimeCalculator::from_config(&config.sprint),
            meetings: MeetingScheduler::new(),
            criteria: config.quality.default_criteria.clone(),
            sprints: RwLock::new(HashMap::new()),
            clock_factory: SimulatedClock::factory(),
            wall_clock: Arc::new(SystemClock),
        }
    }

    /// Use `factory` to build the virtual clock of every sprint started
    /// from now on.
    pub fn with_clock_factory(mut self, factory: ClockFactory) -> Self {
        self.clock_factory = factory;
        self
    }

    /// Wall clock read by [`sync_with_wall_clock`](Self::sync_with_wall_clock).
    pub fn with_wall_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.wall_clock = clock;
        self
    }

    /// Conversions between real and virtual time for this configuration.
    pub fn calculator(&self) -> &TimeCalculator {
        &self.calculator
    }

    /// Start `sprint_id`. A stopped sprint with the same id is replaced.
    pub async fn start_sprint(&self, sprint_id: &str) -> CadenceResult<()> {
        if sprint_id.trim().is_empty() {
            return Err(CadenceError::Validation(
                "sprint id must not be empty".to_string(),
            ));
        }
        {
            let mut sprints = self.sprints.write().await;
            if sprints
                .get(sprint_id)
                .is_some_and(|ctx| ctx.state == SprintState::Active)
            {
                warn!(sprint_id = %sprint_id, "Sprint already active");
                return Err(CadenceError::AlreadyActive(sprint_id.to_string()));
            }
            let clock = (self.clock_factory)(sprint_id);
            let started_at = clock.now();
            let mut events = EventProcessor::new();
            events.process(VirtualInstant::ZERO, SprintEventKind::Started);
            sprints.insert(
                sprint_id.to_string(),
                SprintContext {
                    state: SprintState::Active,
                    clock,
                    started_at,
                    events,
                    standups: Vec::new(),
                    assessment: None,
                    decision: None,
                    last_wall_sync: self.wall_clock.now(),
                },
            );
        }
        info!(sprint_id = %sprint_id, "Sprint started");
        self.audit.record(
            Some(sprint_id),
            AuditKind::SprintStarted,
            format!("sprint {sprint_id} started"),
            &serde_json::json!({
                "length_secs": self.calculator.sprint_length().as_secs(),
                "standup_interval_secs": self.calculator.standup_interval().as_secs(),
            }),
        );
        Ok(())
    }

    /// Whether `sprint_id` exists and is active.
    pub async fn is_active(&self, sprint_id: &str) -> bool {
        let sprints = self.sprints.read().await;
        active(&sprints, sprint_id).is_ok()
    }

    /// Position on the sprint's own timeline; `ZERO` right after start,
    /// whatever the underlying clock reads.
    pub async fn get_current_virtual_time(
        &self,
        sprint_id: &str,
    ) -> CadenceResult<VirtualInstant> {
        let sprints = self.sprints.read().await;
        Ok(active(&sprints, sprint_id)?.position())
    }

    /// Move the sprint's clock forward by `by` of virtual time.
    pub async fn advance_time(
        &self,
        sprint_id: &str,
        by: Duration,
    ) -> CadenceResult<AdvanceOutcome> {
        let mut sprints = self.sprints.write().await;
        let ctx = active_mut(&mut sprints, sprint_id)?;
        ctx.clock.advance(by);
        let now = ctx.position();
        ctx.events.process(
            now,
            SprintEventKind::TimeAdvanced {
                by_ms: clock::duration_millis(by),
            },
        );
        let outcome = self.outcome(ctx);
        debug!(
            sprint_id = %sprint_id,
            now = %now,
            standups_due = outcome.standups_due,
            "Virtual time advanced"
        );
        Ok(outcome)
    }

    /// Advance by the wall-clock time since the previous sync (or the sprint
    /// start), scaled by the compression ratio.
    pub async fn sync_with_wall_clock(&self, sprint_id: &str) -> CadenceResult<AdvanceOutcome> {
        let wall_now = self.wall_clock.now();
        let mut sprints = self.sprints.write().await;
        let ctx = active_mut(&mut sprints, sprint_id)?;
        let real = (wall_now - ctx.last_wall_sync).to_std().unwrap_or_default();
        let virtual_time = self.calculator.to_virtual(real);
        ctx.last_wall_sync = wall_now;
        ctx.clock.advance(virtual_time);
        let now = ctx.position();
        ctx.events.process(
            now,
            SprintEventKind::WallClockSynced {
                real_ms: clock::duration_millis(real),
                virtual_ms: clock::duration_millis(virtual_time),
            },
        );
        Ok(self.outcome(ctx))
    }

    fn outcome(&self, ctx: &SprintContext) -> AdvanceOutcome {
        let held = u32::try_from(ctx.standups.len()).unwrap_or(u32::MAX);
        let now = ctx.position();
        AdvanceOutcome {
            now,
            standups_due: self.calculator.standups_due(now, held),
            sprint_over: self.calculator.is_sprint_over(now),
        }
    }

    /// Hold a standup. Every registered agent must report; the reports are
    /// then applied to the agent table.
    ///
    /// The sprint check, the agent table update and the meeting record all
    /// happen under the registry lock: a failed standup changes nothing.
    pub async fn execute_standup(
        &self,
        sprint_id: &str,
        reports: Vec<StandupReport>,
    ) -> CadenceResult<MeetingRecord> {
        let registered = self.agents.agent_ids().await;
        let record = {
            let mut sprints = self.sprints.write().await;
            let ctx = active_mut(&mut sprints, sprint_id)?;
            let held_at = ctx.position();
            let record = self
                .meetings
                .hold_standup(sprint_id, held_at, &registered, reports)
                .inspect_err(|e| warn!(sprint_id = %sprint_id, error = %e, "Standup rejected"))?;

            let updates: Vec<(&str, f64, AgentStatus)> = record
                .reports
                .iter()
                .map(|r| (r.agent_id.as_str(), r.progress, r.status))
                .collect();
            self.agents.apply_reports(&updates).await?;

            ctx.events.process(
                held_at,
                SprintEventKind::StandupHeld {
                    participants: record.participants.len(),
                    decisions: record.decisions.len(),
                },
            );
            ctx.standups.push(record.clone());
            record
        };
        info!(
            sprint_id = %sprint_id,
            at = %record.held_at,
            participants = record.participants.len(),
            "Standup held"
        );
        self.audit.record(
            Some(sprint_id),
            AuditKind::Standup,
            format!("standup with {} participants", record.participants.len()),
            &record,
        );
        Ok(record)
    }

    /// Assess `task_ids` against the configured acceptance criteria.
    pub async fn assess_completion(
        &self,
        sprint_id: &str,
        task_ids: &[TaskId],
    ) -> CadenceResult<CompletionAssessment> {
        self.assess_completion_with(sprint_id, task_ids, &self.criteria)
            .await
    }

    /// Assess `task_ids` against explicit acceptance criteria.
    pub async fn assess_completion_with(
        &self,
        sprint_id: &str,
        task_ids: &[TaskId],
        criteria: &[String],
    ) -> CadenceResult<CompletionAssessment> {
        {
            let sprints = self.sprints.read().await;
            active(&sprints, sprint_id)?;
        }
        let tasks = self.graph.snapshot_of(task_ids)?;
        let assessment = self.assessor.evaluate_completion(&tasks, criteria);
        {
            let mut sprints = self.sprints.write().await;
            active_mut(&mut sprints, sprint_id)?.record_assessment(&assessment);
        }
        self.audit_assessment(sprint_id, &assessment);
        Ok(assessment)
    }

    /// Assess every task in the graph, decide how to continue, and stop the
    /// sprint.
    ///
    /// The decision is only taken (and the auto-continuation streak only
    /// counted) once the sprint is known to be active under the registry
    /// lock; a sprint stopped concurrently fails with `SprintNotActive`
    /// and leaves the policy untouched.
    pub async fn conclude_sprint(&self, sprint_id: &str) -> CadenceResult<SprintOutcome> {
        {
            let sprints = self.sprints.read().await;
            active(&sprints, sprint_id)?;
        }
        let tasks = self.graph.snapshot();
        let assessment = self.assessor.evaluate_completion(&tasks, &self.criteria[..]);
        let (decision, statistics) = {
            let mut sprints = self.sprints.write().await;
            let ctx = active_mut(&mut sprints, sprint_id)?;
            ctx.record_assessment(&assessment);
            let decision = self.policy.lock().evaluate(&assessment);
            let at = ctx.position();
            ctx.events.process(
                at,
                SprintEventKind::Decided {
                    decision: decision.kind().to_string(),
                },
            );
            ctx.decision = Some(decision.clone());
            ctx.stop();
            (decision, ctx.metrics(sprint_id))
        };

        self.audit_assessment(sprint_id, &assessment);
        self.audit.record(
            Some(sprint_id),
            AuditKind::Decision,
            decision.to_string(),
            &decision,
        );
        self.audit_stopped(sprint_id);
        Ok(SprintOutcome {
            sprint_id: sprint_id.to_string(),
            assessment,
            decision,
            statistics,
        })
    }

    /// A human approved continuing; clears the auto-continuation streak.
    pub fn record_human_approval(&self) {
        self.policy.lock().reset();
    }

    /// Auto-continuations granted in a row across concluded sprints.
    pub fn consecutive_auto_continuations(&self) -> u32 {
        self.policy.lock().consecutive_auto()
    }

    /// Stop an active sprint. Its statistics stay readable.
    pub async fn stop_sprint(&self, sprint_id: &str) -> CadenceResult<()> {
        {
            let mut sprints = self.sprints.write().await;
            active_mut(&mut sprints, sprint_id)?.stop();
        }
        self.audit_stopped(sprint_id);
        Ok(())
    }

    fn audit_assessment(&self, sprint_id: &str, assessment: &CompletionAssessment) {
        self.audit.record(
            Some(sprint_id),
            AuditKind::Assessment,
            format!(
                "{}/{} tasks completed, quality {:.2}",
                assessment.tasks_completed, assessment.tasks_total, assessment.quality_score
            ),
            assessment,
        );
    }

    fn audit_stopped(&self, sprint_id: &str) {
        info!(sprint_id = %sprint_id, "Sprint stopped");
        self.audit.record(
            Some(sprint_id),
            AuditKind::SprintStopped,
            format!("sprint {sprint_id} stopped"),
            &(),
        );
    }

    /// Works for active and stopped sprints alike.
    pub async fn get_sprint_statistics(
        &self,
        sprint_id: &str,
    ) -> CadenceResult<Vec<SprintMetric>> {
        let sprints = self.sprints.read().await;
        sprints
            .get(sprint_id)
            .map(|ctx| ctx.metrics(sprint_id))
            .ok_or_else(|| CadenceError::not_found("sprint", sprint_id))
    }

    /// Standups held in the sprint, oldest first.
    pub async fn meeting_records(&self, sprint_id: &str) -> CadenceResult<Vec<MeetingRecord>> {
        let sprints = self.sprints.read().await;
        sprints
            .get(sprint_id)
            .map(|ctx| ctx.standups.clone())
            .ok_or_else(|| CadenceError::not_found("sprint", sprint_id))
    }

    /// The sprint's event log.
    pub async fn events(&self, sprint_id: &str) -> CadenceResult<Vec<SprintEvent>> {
        let sprints = self.sprints.read().await;
        sprints
            .get(sprint_id)
            .map(|ctx| ctx.events.events().to_vec())
            .ok_or_else(|| CadenceError::not_found("sprint", sprint_id))
    }
}
