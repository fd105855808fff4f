use super::clock::VirtualInstant;
use serde::{Deserialize, Serialize};

/// Something that happened on a sprint's virtual timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SprintEventKind {
    /// The sprint started.
    Started,
    /// The clock was moved explicitly.
    TimeAdvanced {
        /// Virtual milliseconds added.
        by_ms: u64,
    },
    /// The clock followed the wall clock.
    WallClockSynced {
        /// Real milliseconds since the previous sync.
        real_ms: u64,
        /// Virtual milliseconds added for them.
        virtual_ms: u64,
    },
    /// A standup was held.
    StandupHeld {
        /// Agents that reported.
        participants: usize,
        /// Follow-ups derived from blockers.
        decisions: usize,
    },
    /// Completion was assessed.
    Assessed {
        /// Overall completion rate.
        completion_rate: f64,
        /// Quality score.
        quality_score: f64,
    },
    /// The continuation decision was made.
    Decided {
        /// Decision variant name.
        decision: String,
    },
    /// The sprint stopped.
    Stopped,
}

/// One entry of a sprint's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprintEvent {
    /// Position in the sprint's event log, starting at 0.
    pub seq: u64,
    /// Position on the sprint's timeline.
    pub at: VirtualInstant,
    /// What happened.
    #[serde(flatten)]
    pub kind: SprintEventKind,
}

/// Ordered event log of one sprint.
#[derive(Debug, Clone, Default)]
pub struct EventProcessor {
    events: Vec<SprintEvent>,
}

impl EventProcessor {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event; instants earlier than the last event are clamped so
    /// the log stays monotonic.
    pub fn process(&mut self, at: VirtualInstant, kind: SprintEventKind) -> &SprintEvent {
        let at = self.events.last().map_or(at, |last| at.max(last.at));
        let seq = self.events.len() as u64;
        self.events.push(SprintEvent { seq, at, kind });
        &self.events[self.events.len() - 1]
    }

    /// Number of events logged.
    pub fn processed(&self) -> usize {
        self.events.len()
    }

    /// Every event, oldest first.
    pub fn events(&self) -> &[SprintEvent] {
        &self.events
    }

    /// Events at or after `from`.
    pub fn since(&self, from: VirtualInstant) -> impl Iterator<Item = &SprintEvent> {
        self.events.iter().filter(move |e| e.at >= from)
    }

    /// Number of standup events.
    pub fn standups_held(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, SprintEventKind::StandupHeld { .. }))
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_and_monotonic_time() {
        let mut p = EventProcessor::new();
        p.process(VirtualInstant::from_millis(10), SprintEventKind::Started);
        let e = p.process(VirtualInstant::from_millis(5), SprintEventKind::Stopped);
        assert_eq!(e.seq, 1);
        assert_eq!(e.at, VirtualInstant::from_millis(10));
        assert_eq!(p.processed(), 2);
    }

    #[test]
    fn test_standup_count_and_since() {
        let mut p = EventProcessor::new();
        p.process(VirtualInstant::ZERO, SprintEventKind::Started);
        p.process(
            VirtualInstant::from_millis(100),
            SprintEventKind::StandupHeld {
                participants: 3,
                decisions: 1,
            },
        );
        assert_eq!(p.standups_held(), 1);
        assert_eq!(p.since(VirtualInstant::from_millis(50)).count(), 1);
    }

    #[test]
    fn test_event_serializes_flat() {
        let mut p = EventProcessor::new();
        p.process(VirtualInstant::ZERO, SprintEventKind::TimeAdvanced { by_ms: 5 });
        let json = serde_json::to_value(&p.events()[0]).unwrap();
        assert_eq!(json["type"], "time_advanced");
        assert_eq!(json["by_ms"], 5);
        assert_eq!(json["seq"], 0);
    }
}
