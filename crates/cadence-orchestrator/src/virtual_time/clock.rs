use cadence_core::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A point in simulated time, measured from the start of a sprint.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VirtualInstant(u64);

impl VirtualInstant {
    /// Sprint start.
    pub const ZERO: VirtualInstant = VirtualInstant(0);

    /// Instant `millis` after sprint start.
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since sprint start.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time since the sprint began.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.0)
    }

    /// Time between `earlier` and `self`, zero if `earlier` is later.
    pub fn saturating_since(&self, earlier: VirtualInstant) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for VirtualInstant {
    type Output = VirtualInstant;

    fn add(self, rhs: Duration) -> VirtualInstant {
        VirtualInstant(self.0.saturating_add(duration_millis(rhs)))
    }
}

impl fmt::Display for VirtualInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0 / 1000;
        let day = secs / 86_400 + 1;
        let rem = secs % 86_400;
        write!(
            f,
            "day {day} {:02}:{:02}:{:02}",
            rem / 3600,
            (rem % 3600) / 60,
            rem % 60
        )
    }
}

pub(crate) fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Source of simulated time for one sprint.
pub trait VirtualClock: Send + Sync {
    /// Current virtual instant.
    fn now(&self) -> VirtualInstant;

    /// Move the clock forward and return the new instant.
    fn advance(&self, by: Duration) -> VirtualInstant;
}

/// Builds the clock for a newly started sprint, given its id.
pub type ClockFactory = Arc<dyn Fn(&str) -> Arc<dyn VirtualClock> + Send + Sync>;

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    millis: AtomicU64,
}

impl SimulatedClock {
    /// Clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock at `start`.
    pub fn starting_at(start: VirtualInstant) -> Self {
        Self {
            millis: AtomicU64::new(start.as_millis()),
        }
    }

    /// Factory handing every sprint a fresh clock at zero.
    pub fn factory() -> ClockFactory {
        Arc::new(|_: &str| Arc::new(SimulatedClock::new()) as Arc<dyn VirtualClock>)
    }
}

impl VirtualClock for SimulatedClock {
    fn now(&self) -> VirtualInstant {
        VirtualInstant(self.millis.load(Ordering::Acquire))
    }

    fn advance(&self, by: Duration) -> VirtualInstant {
        let by = duration_millis(by);
        let prev = self
            .millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |m| {
                Some(m.saturating_add(by))
            })
            .unwrap_or_else(|m| m);
        VirtualInstant(prev.saturating_add(by))
    }
}

/// Wall-clock view of a virtual clock: `anchor` plus the virtual time
/// elapsed. Lets timestamp-based components (agent staleness, escalation
/// age, audit entries) follow a simulated sprint.
pub struct AnchoredClock {
    anchor: DateTime<Utc>,
    clock: Arc<dyn VirtualClock>,
}

impl AnchoredClock {
    /// Wall clock reading `anchor` when `clock` reads zero.
    pub fn new(anchor: DateTime<Utc>, clock: Arc<dyn VirtualClock>) -> Self {
        Self { anchor, clock }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.clock.now().elapsed())
            .unwrap_or(chrono::Duration::MAX);
        self.anchor
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_clock_advances() {
        let clock = SimulatedClock::new();
        assert_eq!(clock.now(), VirtualInstant::ZERO);
        let t = clock.advance(Duration::from_secs(90));
        assert_eq!(t.as_millis(), 90_000);
        assert_eq!(clock.now(), t);
    }

    #[test]
    fn test_display_day_and_time() {
        let t = VirtualInstant::ZERO + Duration::from_secs(86_400 + 3600 * 2 + 61);
        assert_eq!(t.to_string(), "day 2 02:01:01");
        assert_eq!(VirtualInstant::ZERO.to_string(), "day 1 00:00:00");
    }

    #[test]
    fn test_saturating_since() {
        let a = VirtualInstant::from_millis(5_000);
        let b = VirtualInstant::from_millis(2_000);
        assert_eq!(a.saturating_since(b), Duration::from_secs(3));
        assert_eq!(b.saturating_since(a), Duration::ZERO);
    }

    #[test]
    fn test_anchored_clock_follows_virtual_time() {
        let virtual_clock = Arc::new(SimulatedClock::new());
        let anchor = Utc::now();
        let wall = AnchoredClock::new(anchor, virtual_clock.clone());
        assert_eq!(wall.now(), anchor);
        virtual_clock.advance(Duration::from_secs(3600));
        assert_eq!(wall.now(), anchor + chrono::Duration::hours(1));
    }

    #[test]
    fn test_factory_gives_independent_clocks() {
        let factory = SimulatedClock::factory();
        let a = factory("s1");
        let b = factory("s2");
        a.advance(Duration::from_secs(10));
        assert_eq!(b.now(), VirtualInstant::ZERO);
    }
}
