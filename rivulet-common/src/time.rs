//! Nanosecond time helpers
//!
//! The streaming engine reports every timestamp and duration in nanoseconds.

use std::time::Duration;

/// Nanoseconds per millisecond
pub const NSEC_PER_MSEC: i64 = 1_000_000;

/// Nanoseconds per second
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Convert nanoseconds to whole milliseconds (truncating)
pub fn ns_to_ms(ns: i64) -> i64 {
    ns / NSEC_PER_MSEC
}

/// Convert milliseconds to nanoseconds
pub fn ms_to_ns(ms: i64) -> i64 {
    ms * NSEC_PER_MSEC
}

/// Convert a nanosecond count to a `Duration`, treating negatives as zero
pub fn ns_to_duration(ns: i64) -> Duration {
    Duration::from_nanos(ns.max(0) as u64)
}

/// Duration in nanoseconds of `frames` frames at `rate` Hz
///
/// Returns 0 for a zero rate rather than dividing by zero.
pub fn frames_to_ns(frames: u64, rate: u32) -> u64 {
    if rate == 0 {
        return 0;
    }
    ((frames as u128 * NSEC_PER_SEC as u128) / rate as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_round_trip_on_whole_values() {
        assert_eq!(ms_to_ns(1500), 1_500_000_000);
        assert_eq!(ns_to_ms(1_500_000_000), 1500);
    }

    #[test]
    fn test_ns_to_ms_truncates() {
        assert_eq!(ns_to_ms(1_999_999), 1);
    }

    #[test]
    fn test_ns_to_duration_negative_is_zero() {
        assert_eq!(ns_to_duration(-5), Duration::ZERO);
        assert_eq!(ns_to_duration(2_000_000), Duration::from_millis(2));
    }

    #[test]
    fn test_frames_to_ns() {
        assert_eq!(frames_to_ns(44_100, 44_100), NSEC_PER_SEC);
        assert_eq!(frames_to_ns(22_050, 44_100), NSEC_PER_SEC / 2);
        assert_eq!(frames_to_ns(100, 0), 0);
    }
}
