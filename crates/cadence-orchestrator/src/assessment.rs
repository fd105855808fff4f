use crate::config::QualityConfig;
use crate::types::{Task, TaskStatus};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scored summary of a task snapshot. Recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompletionAssessment {
    /// Tasks in `Completed`.
    pub tasks_completed: usize,
    /// Tasks in `InProgress`.
    pub tasks_in_progress: usize,
    /// Tasks that failed and need intervention before work can resume.
    pub tasks_blocked: usize,
    /// Every task in the snapshot.
    #[serde(default)]
    pub tasks_total: usize,
    /// `tasks_completed / tasks_total`; 0.0 for an empty snapshot.
    pub overall_completion_rate: f64,
    /// Mean priority weight of completed tasks; 0.0 when none completed.
    pub quality_score: f64,
    /// Criteria present, none blank, and quality at or above the threshold.
    pub acceptance_criteria_met: bool,
    /// Always the negation of `acceptance_criteria_met`.
    #[serde(rename = "RequiresPOApproval")]
    pub requires_po_approval: bool,
}

impl CompletionAssessment {
    /// Share of tasks that are blocked; 0.0 for an empty sprint.
    pub fn blocked_ratio(&self) -> f64 {
        if self.tasks_total == 0 {
            0.0
        } else {
            self.tasks_blocked as f64 / self.tasks_total as f64
        }
    }
}

/// Turns a task snapshot plus acceptance criteria into a
/// [`CompletionAssessment`] using a priority-weighted quality model.
#[derive(Debug, Clone, Default)]
pub struct CompletionAssessmentManager {
    quality: QualityConfig,
}

impl CompletionAssessmentManager {
    /// Manager using the given weights and thresholds.
    pub fn new(quality: QualityConfig) -> Self {
        Self { quality }
    }

    /// Weights and thresholds in use.
    pub fn quality_config(&self) -> &QualityConfig {
        &self.quality
    }

    /// Pure: the same inputs always produce the same assessment.
    ///
    /// Criteria are checked for presence only: at least one criterion must
    /// be given and none may be blank.
    pub fn evaluate_completion<S: AsRef<str>>(
        &self,
        tasks: &[Task],
        acceptance_criteria: &[S],
    ) -> CompletionAssessment {
        let mut completed = 0usize;
        let mut in_progress = 0usize;
        let mut blocked = 0usize;
        let mut weight_sum = 0.0;

        for task in tasks {
            match task.status {
                TaskStatus::Completed => {
                    completed += 1;
                    weight_sum += self.quality.weight_for(task.priority);
                }
                TaskStatus::InProgress => in_progress += 1,
                TaskStatus::Failed => blocked += 1,
                TaskStatus::Pending | TaskStatus::Cancelled => {}
            }
        }

        let total = tasks.len();
        let overall_completion_rate = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        };
        let quality_score = if completed == 0 {
            0.0
        } else {
            weight_sum / completed as f64
        };

        let criteria_present = !acceptance_criteria.is_empty()
            && acceptance_criteria
                .iter()
                .all(|c| !c.as_ref().trim().is_empty());
        let acceptance_criteria_met =
            quality_score >= self.quality.acceptance_threshold && criteria_present;
        let requires_po_approval = !acceptance_criteria_met || total == 0;

        debug!(
            total,
            completed,
            in_progress,
            blocked,
            quality_score,
            acceptance_criteria_met,
            "Completion evaluated"
        );

        CompletionAssessment {
            tasks_completed: completed,
            tasks_in_progress: in_progress,
            tasks_blocked: blocked,
            tasks_total: total,
            overall_completion_rate,
            quality_score,
            acceptance_criteria_met,
            requires_po_approval,
        }
    }
}
