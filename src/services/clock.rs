//! Wall-clock source for arrival times and replay-window checks.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};

/// Source of the current UTC time.
///
/// Shared read-only across requests; tests substitute a fixed instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Epoch seconds of the current time shifted by `hour_diff` hours.
    ///
    /// Service clients send their timestamp in this shifted epoch, so the
    /// replay window compares against the same value. An offset chrono
    /// cannot represent leaves the time unshifted.
    fn timestamp(&self, hour_diff: i64) -> i64 {
        let now = self.now();
        Duration::try_hours(hour_diff)
            .and_then(|shift| now.checked_add_signed(shift))
            .unwrap_or(now)
            .timestamp()
    }

    /// Current time rendered at a fixed `hour_diff` offset from UTC.
    ///
    /// Offsets outside a day fall back to UTC.
    fn local_now(&self, hour_diff: i64) -> DateTime<FixedOffset> {
        let offset = hour_diff
            .checked_mul(3600)
            .and_then(|secs| i32::try_from(secs).ok())
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        self.now().with_timezone(&offset)
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub use test_support::FixedClock;

#[cfg(test)]
mod test_support {
    use super::*;

    /// Clock frozen at one instant.
    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock(pub DateTime<Utc>);

    impl FixedClock {
        /// Clock whose `timestamp(hour_diff)` equals `shifted_epoch`.
        pub fn at_shifted_epoch(shifted_epoch: i64, hour_diff: i64) -> Self {
            let utc = DateTime::from_timestamp(shifted_epoch - hour_diff * 3600, 0)
                .expect("epoch in range");
            Self(utc)
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_applies_hour_offset() {
        let clock = FixedClock(DateTime::from_timestamp(1_690_000_000, 0).unwrap());
        assert_eq!(clock.timestamp(0), 1_690_000_000);
        assert_eq!(clock.timestamp(9), 1_690_000_000 + 9 * 3600);
    }

    #[test]
    fn shifted_epoch_constructor_round_trips() {
        let clock = FixedClock::at_shifted_epoch(1_690_000_000, 9);
        assert_eq!(clock.timestamp(9), 1_690_000_000);
    }

    #[test]
    fn local_now_uses_fixed_offset() {
        let clock = FixedClock(DateTime::from_timestamp(0, 0).unwrap());
        let local = clock.local_now(9);
        assert_eq!(local.offset().local_minus_utc(), 9 * 3600);
        assert_eq!(local.to_rfc3339(), "1970-01-01T09:00:00+09:00");
    }

    #[test]
    fn unrepresentable_offsets_do_not_panic() {
        let clock = FixedClock(DateTime::from_timestamp(1_690_000_000, 0).unwrap());
        assert_eq!(clock.timestamp(10_000_000_000), 1_690_000_000);
        assert_eq!(clock.timestamp(i64::MIN), 1_690_000_000);

        // 1_193_047 h * 3600 wraps to a small positive i32 when truncated
        for hour_diff in [10_000_000_000, 1_193_047, 24, i64::MAX] {
            assert_eq!(clock.local_now(hour_diff).offset().local_minus_utc(), 0);
        }
    }

    #[test]
    fn system_clock_is_close_to_now() {
        let drift = (SystemClock.now() - Utc::now()).num_seconds().abs();
        assert!(drift <= 1);
    }
}
