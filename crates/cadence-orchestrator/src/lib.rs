//! Collaboration orchestration core for a roster of development agents.
//!
//! Agents work against a shared dependency graph inside a compressed
//! virtual sprint. Progress is aggregated, stuck agents and resource
//! conflicts are escalated, and at sprint end a completion assessment feeds
//! a decision ladder that either continues automatically or hands control
//! to a human.
//!
//! # Main types
//!
//! - [`TaskDependencyGraph`]: Tasks and acyclic dependency edges; exposes the executable frontier.
//! - [`AgentStateManager`]: One mutable record per registered agent.
//! - [`ProgressAggregator`]: Project-wide progress summary.
//! - [`CompletionAssessmentManager`]: Priority-weighted completion and quality scoring.
//! - [`ContinuationRules`] / [`AutoContinuationPolicy`]: The continuation decision ladder.
//! - [`EscalationManager`] / [`CollaborationCoordinator`]: Monitors for stuck agents and conflicts.
//! - [`VirtualTimeCoordinator`]: Per-sprint virtual clock, standups, and sprint-end evaluation.
//! - [`SprintRunner`]: Application loop driving a whole sprint.

/// Completion assessment.
pub mod assessment;
/// Append-only audit trail.
pub mod audit;
/// Coordinator configuration.
pub mod config;
/// Resource conflict detection between agents.
pub mod coordination;
/// Continuation decision stage.
pub mod decision;
/// Instruction decomposition into task plans.
pub mod decomposer;
/// Sprint runner loop and agent workers.
pub mod engine;
/// Escalation of stuck agents and dead tasks.
pub mod escalation;
/// Task dependency graph.
pub mod graph;
/// Default agent roster.
pub mod profiles;
/// Progress aggregation.
pub mod progress;
/// Agent state tracking.
pub mod state;
/// Shared orchestration types (Task, AgentState, AgentRole, etc.).
pub mod types;
/// Virtual time, standups, and sprint lifecycle.
pub mod virtual_time;

pub use assessment::{CompletionAssessment, CompletionAssessmentManager};
pub use audit::{AuditEntry, AuditKind, AuditTrail};
pub use config::{
    CoordinatorConfig, MonitoringConfig, PolicyConfig, QualityConfig, ResponseWindows,
    SprintConfig,
};
pub use coordination::{
    CollaborationCoordinator, ConflictRecord, ConflictResolution, CoordinationReport,
    ResolutionAction,
};
pub use decision::{
    AutoContinuationPolicy, ContinuationDecision, ContinuationRules, PoApprovalAnalysis,
    PoApprovalAnalyzer, RecommendedAction,
};
pub use decomposer::{materialize, KeywordDecomposer, PlannedTask, TaskDecomposer};
pub use engine::{AgentWorker, SimulatedWorker, SprintReport, SprintRunner, WorkReport, WorkStatus};
pub use escalation::{EscalationCause, EscalationManager, EscalationRecord};
pub use graph::{TaskDependencyGraph, UnresolvableTask};
pub use profiles::default_roster;
pub use progress::{ProgressAggregator, ProgressSummary};
pub use state::{AgentStateManager, HealthReport};
pub use types::{
    AgentRegistration, AgentRole, AgentState, AgentStatus, DependencyEdge, DependencyKind, Task,
    TaskPriority, TaskStatus,
};
pub use virtual_time::{
    AdvanceOutcome, MeetingRecord, MeetingScheduler, SimulatedClock, SprintMetric, SprintOutcome,
    SprintState, StandupReport, TimeCalculator, VirtualClock, VirtualInstant,
    VirtualTimeCoordinator,
};
