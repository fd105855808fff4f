use serde::{Deserialize, Serialize};

/// Severity of an escalation or conflict finding.
///
/// Ordered from least to most urgent so findings can be sorted and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// Needs attention soon.
    Medium,
    /// Needs attention now.
    High,
    /// Work is stopped until someone acts.
    Critical,
}

impl Severity {
    /// Parse a severity name, falling back to `Medium` for unknown input.
    pub fn parse_level(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }

    /// Raise the severity by one step, saturating at `Critical`.
    pub fn escalate(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(Severity::parse_level("HIGH"), Severity::High);
        assert_eq!(Severity::parse_level("critical"), Severity::Critical);
        assert_eq!(Severity::parse_level("bogus"), Severity::Medium);
    }

    #[test]
    fn test_escalate_saturates() {
        assert_eq!(Severity::Low.escalate(), Severity::Medium);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
        assert!(Severity::High > Severity::Medium);
    }
}
