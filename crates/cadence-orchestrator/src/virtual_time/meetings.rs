use super::clock::VirtualInstant;
use crate::types::AgentStatus;
use cadence_core::{AgentId, CadenceError, CadenceResult, SprintId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What one agent says at a standup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandupReport {
    /// Reporting agent.
    pub agent_id: AgentId,
    /// Progress on its current task, in `[0, 1]`.
    pub progress: f64,
    /// Status the agent reports.
    pub status: AgentStatus,
    /// Free-text summary.
    #[serde(default)]
    pub summary: String,
    /// Anything the agent is waiting on.
    #[serde(default)]
    pub blockers: Vec<String>,
}

impl StandupReport {
    /// Report with no summary or blockers.
    pub fn new(agent_id: impl Into<AgentId>, progress: f64, status: AgentStatus) -> Self {
        Self {
            agent_id: agent_id.into(),
            progress,
            status,
            summary: String::new(),
            blockers: Vec::new(),
        }
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Add a blocker.
    pub fn with_blocker(mut self, blocker: impl Into<String>) -> Self {
        self.blockers.push(blocker.into());
        self
    }
}

/// Outcome of a standup that every registered agent attended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeetingRecord {
    /// Sprint the standup belongs to.
    pub sprint_id: SprintId,
    /// Position on the sprint's timeline.
    pub held_at: VirtualInstant,
    /// Sorted by agent id.
    pub participants: Vec<AgentId>,
    /// Follow-ups derived from the reported blockers.
    pub decisions: Vec<String>,
    /// One report per participant, sorted by agent id.
    pub reports: Vec<StandupReport>,
}

/// Validates standup attendance and derives the meeting's decisions.
#[derive(Debug, Clone, Default)]
pub struct MeetingScheduler;

impl MeetingScheduler {
    /// Scheduler with no state.
    pub fn new() -> Self {
        Self
    }

    /// Build a meeting record from `reports`.
    ///
    /// Fails with `Validation` if any registered agent did not report, if a
    /// report comes from an unregistered agent, if an agent reported twice,
    /// or if a progress value is outside `[0, 1]`. A partial meeting is
    /// never produced.
    pub fn hold_standup(
        &self,
        sprint_id: &str,
        held_at: VirtualInstant,
        registered: &[AgentId],
        reports: Vec<StandupReport>,
    ) -> CadenceResult<MeetingRecord> {
        let mut by_agent: BTreeMap<AgentId, StandupReport> = BTreeMap::new();
        for report in reports {
            if !registered.contains(&report.agent_id) {
                return Err(CadenceError::Validation(format!(
                    "standup report from unregistered agent {}",
                    report.agent_id
                )));
            }
            if !report.progress.is_finite() || !(0.0..=1.0).contains(&report.progress) {
                return Err(CadenceError::Validation(format!(
                    "progress for {} must be within [0, 1], got {}",
                    report.agent_id, report.progress
                )));
            }
            let agent_id = report.agent_id.clone();
            if by_agent.insert(agent_id.clone(), report).is_some() {
                return Err(CadenceError::Validation(format!(
                    "agent {agent_id} reported twice"
                )));
            }
        }

        let missing: Vec<&str> = registered
            .iter()
            .filter(|id| !by_agent.contains_key(*id))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(CadenceError::Validation(format!(
                "standup requires a report from every agent; missing: {}",
                missing.join(", ")
            )));
        }

        let reports: Vec<StandupReport> = by_agent.into_values().collect();
        Ok(MeetingRecord {
            sprint_id: sprint_id.to_string(),
            held_at,
            participants: reports.iter().map(|r| r.agent_id.clone()).collect(),
            decisions: derive_decisions(&reports),
            reports,
        })
    }
}

fn derive_decisions(reports: &[StandupReport]) -> Vec<String> {
    let mut decisions = Vec::new();
    for report in reports {
        for blocker in &report.blockers {
            decisions.push(format!(
                "project-manager to unblock {}: {blocker}",
                report.agent_id
            ));
        }
        match report.status {
            AgentStatus::Error => {
                decisions.push(format!("{} needs intervention", report.agent_id))
            }
            AgentStatus::Blocked if report.blockers.is_empty() => {
                decisions.push(format!("{} to describe what blocks them", report.agent_id))
            }
            _ => {}
        }
    }
    if decisions.is_empty() {
        decisions.push("continue as planned".to_string());
    }
    decisions
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn roster(n: usize) -> Vec<AgentId> {
        (1..=n).map(|i| format!("developer-{i}")).collect()
    }

    fn reports(ids: &[AgentId]) -> Vec<StandupReport> {
        ids.iter()
            .map(|id| StandupReport::new(id.clone(), 0.5, AgentStatus::Working))
            .collect()
    }

    #[test]
    fn test_full_attendance() {
        let agents = roster(5);
        let record = MeetingScheduler::new()
            .hold_standup("s1", VirtualInstant::ZERO, &agents, reports(&agents))
            .unwrap();
        assert_eq!(record.participants.len(), 5);
        assert_eq!(record.decisions, vec!["continue as planned".to_string()]);
    }

    #[test]
    fn test_missing_report_fails() {
        let agents = roster(5);
        let err = MeetingScheduler::new()
            .hold_standup("s1", VirtualInstant::ZERO, &agents, reports(&agents[..4]))
            .unwrap_err();
        assert!(matches!(err, CadenceError::Validation(ref m) if m.contains("developer-5")));
    }

    #[test]
    fn test_unknown_and_duplicate_reporters_fail() {
        let agents = roster(2);
        let mut extra = reports(&agents);
        extra.push(StandupReport::new("ghost", 0.1, AgentStatus::Idle));
        assert!(MeetingScheduler::new()
            .hold_standup("s1", VirtualInstant::ZERO, &agents, extra)
            .is_err());

        let mut twice = reports(&agents);
        twice.push(StandupReport::new("developer-1", 0.9, AgentStatus::Working));
        assert!(MeetingScheduler::new()
            .hold_standup("s1", VirtualInstant::ZERO, &agents, twice)
            .is_err());
    }

    #[test]
    fn test_blockers_become_decisions() {
        let agents = roster(2);
        let reports = vec![
            StandupReport::new("developer-1", 0.2, AgentStatus::Blocked)
                .with_blocker("waiting for schema"),
            StandupReport::new("developer-2", 0.0, AgentStatus::Error),
        ];
        let record = MeetingScheduler::new()
            .hold_standup("s1", VirtualInstant::ZERO, &agents, reports)
            .unwrap();
        assert_eq!(record.decisions.len(), 2);
        assert!(record.decisions[0].contains("waiting for schema"));
        assert!(record.decisions[1].contains("developer-2"));
    }

    #[test]
    fn test_out_of_range_progress_rejected() {
        let agents = roster(1);
        let reports = vec![StandupReport::new("developer-1", 1.5, AgentStatus::Working)];
        assert!(MeetingScheduler::new()
            .hold_standup("s1", VirtualInstant::ZERO, &agents, reports)
            .is_err());
    }
}
