use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::types::format_timestamp;

/// `locked_until` value for a lock taken at `now`.
pub fn lock_until(now: DateTime<Utc>, lock_timeout: Duration) -> String {
    let until = chrono::Duration::from_std(lock_timeout)
        .ok()
        .and_then(|timeout| now.checked_add_signed(timeout))
        .unwrap_or(now);
    format_timestamp(&until)
}

/// Whether an idle renewal should write the lock again.
///
/// Always true before the first renewal or with a zero threshold; otherwise
/// true once `threshold` has passed since `last_update`.
pub fn should_update_lock(
    last_update: Option<DateTime<Utc>>,
    threshold: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(last_update) = last_update else {
        return true;
    };
    if threshold.is_zero() {
        return true;
    }
    chrono::Duration::from_std(threshold)
        .ok()
        .and_then(|threshold| last_update.checked_add_signed(threshold))
        .is_some_and(|due| due <= now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: u32, micros: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, seconds).unwrap()
            + chrono::Duration::microseconds(i64::from(micros))
    }

    #[test]
    fn lock_until_adds_timeout_with_microseconds() {
        assert_eq!(
            lock_until(at(0, 999_500), Duration::from_millis(1000)),
            "2024-01-01T12:00:01.999500"
        );
        assert_eq!(
            lock_until(at(0, 999_500), Duration::from_millis(1)),
            "2024-01-01T12:00:01.000500"
        );
    }

    #[test]
    fn first_renewal_always_updates() {
        assert!(should_update_lock(None, Duration::from_secs(5), at(0, 0)));
    }

    #[test]
    fn zero_threshold_always_updates() {
        assert!(should_update_lock(Some(at(0, 0)), Duration::ZERO, at(0, 0)));
    }

    #[test]
    fn threshold_throttles_updates() {
        let last = at(0, 0);
        let threshold = Duration::from_millis(1500);
        assert!(!should_update_lock(Some(last), threshold, at(1, 0)));
        assert!(should_update_lock(Some(last), threshold, at(1, 500_000)));
        assert!(should_update_lock(Some(last), threshold, at(3, 0)));
    }
}
