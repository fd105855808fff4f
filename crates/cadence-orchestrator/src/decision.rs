//! Continuation decision stage.
//!
//! [`ContinuationRules::decide`] is the pure priority ladder that maps a
//! [`CompletionAssessment`] to exactly one [`ContinuationDecision`].
//! [`AutoContinuationPolicy`] adds the one piece of state the ladder needs
//! across sprints (how many auto-continuations happened in a row), and
//! [`PoApprovalAnalyzer`] exposes the same ladder as an approval verdict
//! for the human-facing surface.

use crate::assessment::CompletionAssessment;
use crate::config::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

/// The single outcome of a sprint-end evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Decision", content = "Reason")]
pub enum ContinuationDecision {
    /// Start the next sprint without asking anyone.
    AutoContinue(String),
    /// Ask the product owner before continuing.
    #[serde(rename = "RequirePOApproval")]
    RequirePoApproval(String),
    /// Halt autonomous execution.
    StopExecution(String),
    /// Hand the situation to management.
    EscalateToManagement(String),
}

impl ContinuationDecision {
    /// Free-text reason carried by every variant.
    pub fn reason(&self) -> &str {
        match self {
            ContinuationDecision::AutoContinue(r)
            | ContinuationDecision::RequirePoApproval(r)
            | ContinuationDecision::StopExecution(r)
            | ContinuationDecision::EscalateToManagement(r) => r,
        }
    }

    /// Stable variant name, as serialized.
    pub fn kind(&self) -> &'static str {
        match self {
            ContinuationDecision::AutoContinue(_) => "AutoContinue",
            ContinuationDecision::RequirePoApproval(_) => "RequirePOApproval",
            ContinuationDecision::StopExecution(_) => "StopExecution",
            ContinuationDecision::EscalateToManagement(_) => "EscalateToManagement",
        }
    }

    /// Whether a human has to act before the next sprint may start.
    pub fn requires_human(&self) -> bool {
        !matches!(self, ContinuationDecision::AutoContinue(_))
    }
}

impl std::fmt::Display for ContinuationDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.reason())
    }
}

/// Thresholds for the decision ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuationRules {
    /// Minimum quality for a fully completed sprint to auto-continue.
    pub auto_continue_quality: f64,
    /// Blocked-task ratio above which an accepted sprint escalates.
    pub blocked_ratio_ceiling: f64,
}

impl Default for ContinuationRules {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}

impl ContinuationRules {
    /// Thresholds taken from the `quality` and `policy` sections.
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            auto_continue_quality: config.quality.auto_continue_quality,
            blocked_ratio_ceiling: config.policy.blocked_ratio_ceiling,
        }
    }

    /// First matching rule wins:
    ///
    /// 1. full completion at high quality → `AutoContinue`
    /// 2. acceptance criteria not met → `RequirePoApproval`
    /// 3. blocked ratio above the ceiling → `EscalateToManagement`
    /// 4. anything else → `RequirePoApproval`
    ///
    /// Inputs that are not finite ratios never reach the ladder and fall
    /// back to `RequirePoApproval`.
    pub fn decide(&self, assessment: &CompletionAssessment) -> ContinuationDecision {
        let rate = assessment.overall_completion_rate;
        let quality = assessment.quality_score;
        if !is_ratio(rate)
            || !is_ratio(quality)
            || assessment.tasks_blocked > assessment.tasks_total
        {
            return ContinuationDecision::RequirePoApproval(
                "assessment could not be classified".to_string(),
            );
        }

        if rate >= 1.0 && quality >= self.auto_continue_quality {
            return ContinuationDecision::AutoContinue("high-quality completion".to_string());
        }
        if !assessment.acceptance_criteria_met {
            return ContinuationDecision::RequirePoApproval(
                "quality threshold not met".to_string(),
            );
        }
        let blocked_ratio = assessment.blocked_ratio();
        if blocked_ratio > self.blocked_ratio_ceiling {
            return ContinuationDecision::EscalateToManagement(format!(
                "{:.0}% of tasks blocked (ceiling {:.0}%)",
                blocked_ratio * 100.0,
                self.blocked_ratio_ceiling * 100.0
            ));
        }
        ContinuationDecision::RequirePoApproval(format!(
            "sprint accepted at {:.0}% completion; confirm before continuing",
            rate * 100.0
        ))
    }
}

fn is_ratio(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// The ladder plus a cap on consecutive auto-continuations.
///
/// Once the cap is reached an `AutoContinue` becomes `StopExecution`
/// until [`reset`](Self::reset) is called (a human signed off).
#[derive(Debug, Clone)]
pub struct AutoContinuationPolicy {
    rules: ContinuationRules,
    max_consecutive: u32,
    consecutive: u32,
}

impl AutoContinuationPolicy {
    /// Policy allowing at most `max_consecutive` auto-continuations in a row.
    pub fn new(rules: ContinuationRules, max_consecutive: u32) -> Self {
        Self {
            rules,
            max_consecutive,
            consecutive: 0,
        }
    }

    /// Policy built from the coordinator configuration.
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(
            ContinuationRules::from_config(config),
            config.policy.max_consecutive_auto_sprints,
        )
    }

    /// The underlying ladder.
    pub fn rules(&self) -> &ContinuationRules {
        &self.rules
    }

    /// Auto-continuations granted since the last human decision.
    pub fn consecutive_auto(&self) -> u32 {
        self.consecutive
    }

    /// Decide, then apply the consecutive auto-continuation cap.
    pub fn evaluate(&mut self, assessment: &CompletionAssessment) -> ContinuationDecision {
        let decision = match self.rules.decide(assessment) {
            ContinuationDecision::AutoContinue(reason) => {
                if self.consecutive >= self.max_consecutive {
                    ContinuationDecision::StopExecution(format!(
                        "auto-continuation limit reached ({} in a row)",
                        self.consecutive
                    ))
                } else {
                    self.consecutive += 1;
                    ContinuationDecision::AutoContinue(reason)
                }
            }
            other => {
                self.consecutive = 0;
                other
            }
        };
        info!(
            decision = decision.kind(),
            reason = decision.reason(),
            consecutive_auto = self.consecutive,
            "Continuation decision"
        );
        decision
    }

    /// Clear the counter after a human approved continuing.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Categorical recommendation shown to the product owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendedAction {
    /// Continue without prompting.
    AutoApprove,
    /// Prompt the product owner.
    RequestPoApproval,
    /// Route to management.
    EscalateToManagement,
    /// Halt autonomous execution.
    StopExecution,
}

impl RecommendedAction {
    /// Short label for prompts and logs.
    pub fn label(&self) -> &'static str {
        match self {
            RecommendedAction::AutoApprove => "auto-approve",
            RecommendedAction::RequestPoApproval => "po-approval-required",
            RecommendedAction::EscalateToManagement => "escalate-to-management",
            RecommendedAction::StopExecution => "stop-execution",
        }
    }
}

impl From<&ContinuationDecision> for RecommendedAction {
    fn from(decision: &ContinuationDecision) -> Self {
        match decision {
            ContinuationDecision::AutoContinue(_) => RecommendedAction::AutoApprove,
            ContinuationDecision::RequirePoApproval(_) => RecommendedAction::RequestPoApproval,
            ContinuationDecision::StopExecution(_) => RecommendedAction::StopExecution,
            ContinuationDecision::EscalateToManagement(_) => {
                RecommendedAction::EscalateToManagement
            }
        }
    }
}

/// Output of [`PoApprovalAnalyzer::analyze`].
///
/// `requires_po_approval` and `recommended_action` always agree: the flag
/// is false exactly when the action is [`RecommendedAction::AutoApprove`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoApprovalAnalysis {
    /// Whether the product owner has to be prompted.
    pub requires_po_approval: bool,
    /// What the prompt should suggest.
    pub recommended_action: RecommendedAction,
    /// Human-readable reason, taken from the decision.
    pub reason: String,
}

impl PoApprovalAnalysis {
    /// Approval view of a decision that has already been made, for example
    /// one the [`AutoContinuationPolicy`] turned into `StopExecution`.
    ///
    /// An `AutoContinue` over an assessment whose acceptance criteria were
    /// not met is downgraded to a PO approval request.
    pub fn for_decision(
        decision: &ContinuationDecision,
        assessment: &CompletionAssessment,
    ) -> Self {
        if assessment.requires_po_approval && !decision.requires_human() {
            return Self {
                requires_po_approval: true,
                recommended_action: RecommendedAction::RequestPoApproval,
                reason: "sprint completed but acceptance criteria not met".to_string(),
            };
        }
        Self {
            requires_po_approval: decision.requires_human(),
            recommended_action: RecommendedAction::from(decision),
            reason: decision.reason().to_string(),
        }
    }
}

/// Thin view over [`ContinuationRules`] for the approval prompt.
#[derive(Debug, Clone, Default)]
pub struct PoApprovalAnalyzer {
    rules: ContinuationRules,
}

impl PoApprovalAnalyzer {
    /// Analyzer over the given ladder thresholds.
    pub fn new(rules: ContinuationRules) -> Self {
        Self { rules }
    }

    /// Run the ladder and report whether a human must approve.
    pub fn analyze(&self, assessment: &CompletionAssessment) -> PoApprovalAnalysis {
        PoApprovalAnalysis::for_decision(&self.rules.decide(assessment), assessment)
    }
}
