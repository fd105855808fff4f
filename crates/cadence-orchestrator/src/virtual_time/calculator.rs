use super::clock::{duration_millis, VirtualInstant};
use crate::config::SprintConfig;
use std::time::Duration;

/// Arithmetic over the sprint's virtual timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeCalculator {
    sprint_length: Duration,
    standup_interval: Duration,
    compression_ratio: f64,
}

impl TimeCalculator {
    /// Calculator for the given sprint shape.
    pub fn new(
        sprint_length: Duration,
        standup_interval: Duration,
        compression_ratio: f64,
    ) -> Self {
        Self {
            sprint_length,
            standup_interval,
            compression_ratio,
        }
    }

    /// Calculator from the `sprint` config section.
    pub fn from_config(config: &SprintConfig) -> Self {
        Self::new(
            config.length(),
            config.standup_interval(),
            config.compression_ratio,
        )
    }

    /// Virtual sprint length.
    pub fn sprint_length(&self) -> Duration {
        self.sprint_length
    }

    /// Virtual time between standups.
    pub fn standup_interval(&self) -> Duration {
        self.standup_interval
    }

    /// Virtual seconds per real second.
    pub fn compression_ratio(&self) -> f64 {
        self.compression_ratio
    }

    /// Virtual time corresponding to `real` wall-clock time.
    pub fn to_virtual(&self, real: Duration) -> Duration {
        scale(real, self.compression_ratio)
    }

    /// Wall-clock time needed for `virtual_time` to pass.
    pub fn to_real(&self, virtual_time: Duration) -> Duration {
        if self.compression_ratio > 0.0 {
            from_secs(virtual_time.as_secs_f64() / self.compression_ratio)
        } else {
            Duration::MAX
        }
    }

    /// Standup boundaries crossed between sprint start and `now`.
    pub fn standups_elapsed(&self, now: VirtualInstant) -> u32 {
        let interval = duration_millis(self.standup_interval);
        if interval == 0 {
            return 0;
        }
        u32::try_from(now.as_millis() / interval).unwrap_or(u32::MAX)
    }

    /// Standups owed at `now` given how many were already held.
    pub fn standups_due(&self, now: VirtualInstant, held: u32) -> u32 {
        self.standups_elapsed(now).saturating_sub(held)
    }

    /// When the standup after `held` standups is scheduled.
    pub fn next_standup_at(&self, held: u32) -> VirtualInstant {
        VirtualInstant::ZERO + self.standup_interval.saturating_mul(held.saturating_add(1))
    }

    /// Fraction of the sprint elapsed, clamped to `[0, 1]`.
    pub fn sprint_progress(&self, now: VirtualInstant) -> f64 {
        let length = duration_millis(self.sprint_length);
        if length == 0 {
            return 1.0;
        }
        (now.as_millis() as f64 / length as f64).clamp(0.0, 1.0)
    }

    /// Whether the time box has been reached.
    pub fn is_sprint_over(&self, now: VirtualInstant) -> bool {
        now.elapsed() >= self.sprint_length
    }

    /// Virtual time left in the sprint.
    pub fn remaining(&self, now: VirtualInstant) -> Duration {
        self.sprint_length.saturating_sub(now.elapsed())
    }
}

impl Default for TimeCalculator {
    fn default() -> Self {
        Self::from_config(&SprintConfig::default())
    }
}

fn scale(d: Duration, factor: f64) -> Duration {
    from_secs(d.as_secs_f64() * factor)
}

fn from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn calc() -> TimeCalculator {
        TimeCalculator::default()
    }

    #[test]
    fn test_compression_default_one_day_per_minute() {
        let c = calc();
        assert_eq!(c.to_virtual(Duration::from_secs(60)), HOUR * 24);
        assert_eq!(c.to_real(HOUR * 24), Duration::from_secs(60));
    }

    #[test]
    fn test_standups_due() {
        let c = calc();
        let t = VirtualInstant::ZERO + HOUR * 50;
        assert_eq!(c.standups_elapsed(t), 2);
        assert_eq!(c.standups_due(t, 0), 2);
        assert_eq!(c.standups_due(t, 2), 0);
        assert_eq!(c.standups_due(t, 5), 0);
        assert_eq!(c.next_standup_at(2), VirtualInstant::ZERO + HOUR * 72);
    }

    #[test]
    fn test_sprint_progress_and_end() {
        let c = calc();
        let half = VirtualInstant::ZERO + HOUR * 24 * 7;
        assert!((c.sprint_progress(half) - 0.5).abs() < 1e-9);
        assert!(!c.is_sprint_over(half));
        assert_eq!(c.remaining(half), HOUR * 24 * 7);

        let past = VirtualInstant::ZERO + HOUR * 24 * 20;
        assert_eq!(c.sprint_progress(past), 1.0);
        assert!(c.is_sprint_over(past));
        assert_eq!(c.remaining(past), Duration::ZERO);
    }

    #[test]
    fn test_non_finite_ratio_saturates() {
        let c = TimeCalculator::new(HOUR, HOUR, f64::INFINITY);
        assert_eq!(c.to_virtual(Duration::from_secs(1)), Duration::MAX);
        assert_eq!(c.to_virtual(Duration::ZERO), Duration::ZERO);
    }
}
