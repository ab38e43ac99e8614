use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Render a millisecond count as `M:SS`. Minutes are not capped at 59.
pub fn format_duration(ms: u64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    format!("{minutes}:{seconds:02}")
}

pub fn format_remaining(remaining: Duration) -> String {
    format_duration(remaining.as_millis() as u64)
}

/// How much of `cooldown` is left at `now` for something claimed at `claimed_at`.
///
/// Zero means expired. A `claimed_at` later than `now` counts as "just
/// claimed", so the result never exceeds `cooldown`.
pub fn remaining_cooldown(
    claimed_at: DateTime<Utc>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Duration {
    let elapsed = now
        .signed_duration_since(claimed_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
    cooldown.saturating_sub(elapsed)
}

/// Source of "now". Lets the cooldown logic run against a fake clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[test]
    fn test_format_duration_examples() {
        assert_eq!(format_duration(65_000), "1:05");
        assert_eq!(format_duration(3_000), "0:03");
        assert_eq!(format_duration(3_600_000), "60:00");
        assert_eq!(format_duration(0), "0:00");
        // sub-second remainders are truncated, not rounded
        assert_eq!(format_duration(59_999), "0:59");
    }

    #[test]
    fn test_remaining_cooldown_boundaries() {
        let t0 = Utc::now();
        assert_eq!(remaining_cooldown(t0, t0, HOUR), HOUR);

        let at_expiry = t0 + chrono::Duration::from_std(HOUR).unwrap();
        assert_eq!(remaining_cooldown(t0, at_expiry, HOUR), Duration::ZERO);

        let past_expiry = at_expiry + chrono::Duration::milliseconds(1);
        assert_eq!(remaining_cooldown(t0, past_expiry, HOUR), Duration::ZERO);
    }

    #[test]
    fn test_remaining_cooldown_partial_and_future_claims() {
        let t0 = Utc::now();
        let later = t0 + chrono::Duration::minutes(15);
        assert_eq!(remaining_cooldown(t0, later, HOUR), Duration::from_secs(45 * 60));

        // clock skew: claim stamped after "now"
        let skewed = t0 + chrono::Duration::seconds(30);
        assert_eq!(remaining_cooldown(skewed, t0, HOUR), HOUR);
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
