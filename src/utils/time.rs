//! Media-time conversion and formatting utilities

use std::time::Duration;

use crate::domain::model::MICROS_PER_SECOND;

/// Convert a `Duration` to whole microseconds, saturating at `u64::MAX`
pub fn duration_to_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Convert milliseconds to microseconds
pub fn ms_to_us(ms: u64) -> u64 {
    ms.saturating_mul(1_000)
}

/// Convert microseconds to whole milliseconds
pub fn us_to_ms(us: i64) -> i64 {
    us / 1_000
}

/// Format a media timestamp as `S.mmms`, e.g. `2.500s`
pub fn format_us(us: i64) -> String {
    let sign = if us < 0 { "-" } else { "" };
    let abs = us.unsigned_abs();
    let seconds = abs / MICROS_PER_SECOND as u64;
    let millis = (abs % MICROS_PER_SECOND as u64) / 1_000;
    format!("{}{}.{:03}s", sign, seconds, millis)
}

/// Format a media timestamp as `MM:SS.mmm`
pub fn format_clock(us: i64) -> String {
    let abs = us.unsigned_abs();
    let total_ms = abs / 1_000;
    let minutes = total_ms / 60_000;
    let seconds = (total_ms % 60_000) / 1_000;
    let millis = total_ms % 1_000;
    format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_us() {
        assert_eq!(format_us(2_500_000), "2.500s");
        assert_eq!(format_us(0), "0.000s");
        assert_eq!(format_us(-16_000), "-0.016s");
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(61_250_000), "01:01.250");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(ms_to_us(6_000), 6_000_000);
        assert_eq!(us_to_ms(2_509_999), 2_509);
        assert_eq!(duration_to_us(Duration::from_millis(16)), 16_000);
    }
}
