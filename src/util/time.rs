//! Wall-clock timing utilities
//!
//! Engine runs are measured end to end with a monotonic clock; these helpers
//! wrap `Instant` and format the resulting durations for reports.

use std::time::{Duration, Instant};

/// Monotonic start point of a measured run
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    instant: Instant,
}

impl Timestamp {
    /// Create a new timestamp representing the current time
    #[inline]
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
        }
    }

    /// Get the elapsed time since this timestamp
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }
}

/// Format a duration as seconds with three decimals
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use modelbench::util::time::format_seconds;
///
/// assert_eq!(format_seconds(Duration::from_millis(1234)), "1.234 s");
/// assert_eq!(format_seconds(Duration::from_micros(400)), "0.000 s");
/// ```
pub fn format_seconds(duration: Duration) -> String {
    format!("{:.3} s", duration.as_secs_f64())
}

/// Tasks completed per second
pub fn calculate_rate(tasks: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        tasks as f64 / seconds
    } else {
        0.0
    }
}

/// Format a rate (tasks per second)
///
/// # Examples
///
/// ```
/// use modelbench::util::time::format_rate;
///
/// assert_eq!(format_rate(500.0), "500");
/// assert_eq!(format_rate(1500.0), "1.50K");
/// assert_eq!(format_rate(2_500_000.0), "2.50M");
/// ```
pub fn format_rate(rate: f64) -> String {
    if rate < 1_000.0 {
        format!("{:.0}", rate)
    } else if rate < 1_000_000.0 {
        format!("{:.2}K", rate / 1_000.0)
    } else {
        format!("{:.2}M", rate / 1_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timestamp_elapsed() {
        let start = Timestamp::now();
        thread::sleep(Duration::from_millis(10));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(Duration::ZERO), "0.000 s");
        assert_eq!(format_seconds(Duration::from_millis(1500)), "1.500 s");
        assert_eq!(format_seconds(Duration::from_secs(62)), "62.000 s");
        assert_eq!(format_seconds(Duration::from_micros(123_456)), "0.123 s");
    }

    #[test]
    fn test_calculate_rate() {
        assert_eq!(calculate_rate(1000, Duration::from_secs(10)), 100.0);
        assert_eq!(calculate_rate(1000, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(12.4), "12");
        assert_eq!(format_rate(1500.0), "1.50K");
        assert_eq!(format_rate(1_500_000.0), "1.50M");
    }
}
