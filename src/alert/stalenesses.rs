/// Input staleness detection.
///
/// The satellite archive normally lags real time by a few hours. When it
/// stops updating, the observed part of every forcing series silently ends
/// early and the run leans on forecast data alone. This module flags that
/// situation so it shows up in the logs of every affected run.
///
/// # Clock injection
/// All functions take `now: DateTime<Utc>` instead of calling `Utc::now()`,
/// which keeps them deterministic in tests.

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Staleness check
// ---------------------------------------------------------------------------

/// Minutes between `last_observation` and `now`. Negative for future stamps.
pub fn age_minutes(last_observation: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - last_observation).num_minutes()
}

/// Returns `true` if `last_observation` is older than `max_age_minutes`.
///
/// Staleness is strictly greater than the threshold:
///   age > max_age_minutes  →  stale
///   age == max_age_minutes →  not stale
///
/// A timestamp in the future is never stale.
pub fn is_stale_at(last_observation: DateTime<Utc>, max_age_minutes: u64, now: DateTime<Utc>) -> bool {
    let age = age_minutes(last_observation, now);
    age > 0 && age as u64 > max_age_minutes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    /// A fixed "now" used across all tests: 2024-01-20 06:00:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 20, 6, 0, 0).unwrap()
    }

    #[test]
    fn test_archive_exactly_at_threshold_is_not_stale() {
        let last = fixed_now() - Duration::minutes(720);
        assert!(
            !is_stale_at(last, 720, fixed_now()),
            "age equal to the threshold is not stale, staleness is strictly greater than"
        );
    }

    #[test]
    fn test_archive_one_minute_past_threshold_is_stale() {
        let last = fixed_now() - Duration::minutes(721);
        assert!(is_stale_at(last, 720, fixed_now()));
    }

    #[test]
    fn test_same_archive_stale_under_tight_threshold_not_under_loose() {
        let last = fixed_now() - Duration::hours(5);
        assert!(is_stale_at(last, 4 * 60, fixed_now()));
        assert!(!is_stale_at(last, 6 * 60, fixed_now()));
    }

    #[test]
    fn test_future_timestamp_is_never_stale() {
        let last = fixed_now() + Duration::hours(3);
        assert!(!is_stale_at(last, 0, fixed_now()));
        assert_eq!(age_minutes(last, fixed_now()), -180);
    }
}
