use crate::types::TaskPriority;
use cadence_core::{CadenceError, CadenceResult, Severity};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the whole coordinator. Every section is optional in a
/// config file; missing values take the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Completion assessment weights and thresholds.
    #[serde(default)]
    pub quality: QualityConfig,
    /// Decision ladder thresholds.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Health and escalation thresholds.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Sprint length, standup cadence, and time compression.
    #[serde(default)]
    pub sprint: SprintConfig,
}

/// Priority weights and thresholds used by completion assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Weight of a completed critical task.
    #[serde(default = "default_critical_weight")]
    pub critical_weight: f64,
    /// Weight of a completed high-priority task.
    #[serde(default = "default_high_weight")]
    pub high_weight: f64,
    /// Weight of a completed medium-priority task.
    #[serde(default = "default_medium_weight")]
    pub medium_weight: f64,
    /// Weight of a completed low-priority task.
    #[serde(default = "default_low_weight")]
    pub low_weight: f64,
    /// Minimum quality score for acceptance criteria to count as met.
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,
    /// Minimum quality score for a fully completed sprint to auto-continue.
    #[serde(default = "default_auto_continue_quality")]
    pub auto_continue_quality: f64,
    /// Criteria used when the caller supplies none.
    #[serde(default = "default_criteria")]
    pub default_criteria: Vec<String>,
}

impl QualityConfig {
    /// Quality weight of a completed task with the given priority.
    pub fn weight_for(&self, priority: TaskPriority) -> f64 {
        match priority {
            TaskPriority::Critical => self.critical_weight,
            TaskPriority::High => self.high_weight,
            TaskPriority::Medium => self.medium_weight,
            TaskPriority::Low => self.low_weight,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            critical_weight: default_critical_weight(),
            high_weight: default_high_weight(),
            medium_weight: default_medium_weight(),
            low_weight: default_low_weight(),
            acceptance_threshold: default_acceptance_threshold(),
            auto_continue_quality: default_auto_continue_quality(),
            default_criteria: default_criteria(),
        }
    }
}

/// Thresholds for the continuation decision ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Blocked-task ratio above which an accepted sprint still escalates.
    #[serde(default = "default_blocked_ratio_ceiling")]
    pub blocked_ratio_ceiling: f64,
    /// Auto-continuations allowed in a row before execution is stopped.
    #[serde(default = "default_max_auto_sprints")]
    pub max_consecutive_auto_sprints: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            blocked_ratio_ceiling: default_blocked_ratio_ceiling(),
            max_consecutive_auto_sprints: default_max_auto_sprints(),
        }
    }
}

/// Health and escalation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// An agent whose last update is older than this is unresponsive.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// How long an agent may sit in `Blocked`/`Error` before escalation.
    #[serde(default = "default_escalate_after_secs")]
    pub escalate_after_secs: u64,
    /// Health checks taking longer count as unhealthy.
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    /// Response window attached to escalations, per severity.
    #[serde(default)]
    pub response_windows: ResponseWindows,
}

impl MonitoringConfig {
    /// `stale_after_secs` as a duration.
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(saturating_secs(self.stale_after_secs))
    }

    /// `escalate_after_secs` as a duration.
    pub fn escalate_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(saturating_secs(self.escalate_after_secs))
    }

    /// `health_check_timeout_ms` as a duration.
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            escalate_after_secs: default_escalate_after_secs(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            response_windows: ResponseWindows::default(),
        }
    }
}

/// Deadlines (in minutes) by which an escalation should be answered.
/// `None` means no deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseWindows {
    /// Low severity.
    #[serde(default)]
    pub low_mins: Option<u64>,
    /// Medium severity.
    #[serde(default = "default_medium_window")]
    pub medium_mins: Option<u64>,
    /// High severity.
    #[serde(default = "default_high_window")]
    pub high_mins: Option<u64>,
    /// Critical severity.
    #[serde(default = "default_critical_window")]
    pub critical_mins: Option<u64>,
}

impl ResponseWindows {
    /// Response window for `severity`, if it has one.
    pub fn window_for(&self, severity: Severity) -> Option<chrono::Duration> {
        let mins = match severity {
            Severity::Low => self.low_mins,
            Severity::Medium => self.medium_mins,
            Severity::High => self.high_mins,
            Severity::Critical => self.critical_mins,
        }?;
        Some(chrono::Duration::minutes(saturating_secs(mins)))
    }
}

impl Default for ResponseWindows {
    fn default() -> Self {
        Self {
            low_mins: None,
            medium_mins: default_medium_window(),
            high_mins: default_high_window(),
            critical_mins: default_critical_window(),
        }
    }
}

/// Shape of a virtual sprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintConfig {
    /// Sprint length in virtual days.
    #[serde(default = "default_length_days")]
    pub length_days: u32,
    /// Virtual hours between standups.
    #[serde(default = "default_standup_interval_hours")]
    pub standup_interval_hours: u32,
    /// Virtual seconds that elapse per real second.
    #[serde(default = "default_compression_ratio")]
    pub compression_ratio: f64,
}

impl SprintConfig {
    /// Sprint length as a duration.
    pub fn length(&self) -> Duration {
        Duration::from_secs(u64::from(self.length_days) * 24 * 3600)
    }

    /// Standup interval as a duration.
    pub fn standup_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.standup_interval_hours) * 3600)
    }
}

impl Default for SprintConfig {
    fn default() -> Self {
        Self {
            length_days: default_length_days(),
            standup_interval_hours: default_standup_interval_hours(),
            compression_ratio: default_compression_ratio(),
        }
    }
}

impl CoordinatorConfig {
    /// Reject values that would make the ladder or the clock meaningless.
    pub fn validate(&self) -> CadenceResult<()> {
        let q = &self.quality;
        for (name, value) in [
            ("quality.critical_weight", q.critical_weight),
            ("quality.high_weight", q.high_weight),
            ("quality.medium_weight", q.medium_weight),
            ("quality.low_weight", q.low_weight),
            ("quality.acceptance_threshold", q.acceptance_threshold),
            ("quality.auto_continue_quality", q.auto_continue_quality),
            ("policy.blocked_ratio_ceiling", self.policy.blocked_ratio_ceiling),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CadenceError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.sprint.length_days == 0 {
            return Err(CadenceError::Config(
                "sprint.length_days must be at least 1".to_string(),
            ));
        }
        if self.sprint.standup_interval_hours == 0 {
            return Err(CadenceError::Config(
                "sprint.standup_interval_hours must be at least 1".to_string(),
            ));
        }
        if !self.sprint.compression_ratio.is_finite() || self.sprint.compression_ratio <= 0.0 {
            return Err(CadenceError::Config(format!(
                "sprint.compression_ratio must be positive, got {}",
                self.sprint.compression_ratio
            )));
        }
        Ok(())
    }
}

/// Large enough for any sane threshold, small enough that
/// `chrono::Duration::minutes` cannot overflow.
const MAX_SECS: u64 = (i64::MAX / 1_000_000) as u64;

fn saturating_secs(value: u64) -> i64 {
    value.min(MAX_SECS) as i64
}

fn default_critical_weight() -> f64 {
    0.95
}
fn default_high_weight() -> f64 {
    0.90
}
fn default_medium_weight() -> f64 {
    0.75
}
fn default_low_weight() -> f64 {
    0.60
}
fn default_acceptance_threshold() -> f64 {
    0.80
}
fn default_auto_continue_quality() -> f64 {
    0.90
}
fn default_criteria() -> Vec<String> {
    vec!["all planned tasks meet the definition of done".to_string()]
}
fn default_blocked_ratio_ceiling() -> f64 {
    0.30
}
fn default_max_auto_sprints() -> u32 {
    3
}
fn default_stale_after_secs() -> u64 {
    300
}
fn default_escalate_after_secs() -> u64 {
    600
}
fn default_health_check_timeout_ms() -> u64 {
    500
}
fn default_medium_window() -> Option<u64> {
    Some(24 * 60)
}
fn default_high_window() -> Option<u64> {
    Some(4 * 60)
}
fn default_critical_window() -> Option<u64> {
    Some(60)
}
fn default_length_days() -> u32 {
    14
}
fn default_standup_interval_hours() -> u32 {
    24
}
fn default_compression_ratio() -> f64 {
    1440.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quality.weight_for(TaskPriority::Critical), 0.95);
        assert_eq!(config.quality.weight_for(TaskPriority::Low), 0.60);
        assert_eq!(config.sprint.length(), Duration::from_secs(14 * 24 * 3600));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"policy": {"blocked_ratio_ceiling": 0.5}}"#).unwrap();
        assert_eq!(config.policy.blocked_ratio_ceiling, 0.5);
        assert_eq!(config.policy.max_consecutive_auto_sprints, 3);
        assert_eq!(config.quality.acceptance_threshold, 0.80);
    }

    #[test]
    fn test_out_of_range_weight_rejected() {
        let mut config = CoordinatorConfig::default();
        config.quality.high_weight = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("quality.high_weight"));
    }

    #[test]
    fn test_zero_length_sprint_rejected() {
        let mut config = CoordinatorConfig::default();
        config.sprint.length_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_response_windows() {
        let windows = ResponseWindows::default();
        assert!(windows.window_for(Severity::Low).is_none());
        assert_eq!(
            windows.window_for(Severity::Critical),
            Some(chrono::Duration::minutes(60))
        );
    }
}
