//! Human-readable formatting for the CLI.

use chrono::{DateTime, Duration, Local, Utc};

/// `"2h 5m"`, or `"5m"` under an hour. Sub-minute remainders are dropped.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.num_seconds().abs();
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// `"Due in 1h 30m"` or `"Overdue by 15m"` relative to `now`.
pub fn format_relative_due(due: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = due - now;
    if remaining < Duration::zero() {
        format!("Overdue by {}", format_duration(remaining))
    } else {
        format!("Due in {}", format_duration(remaining))
    }
}

pub fn format_frequency(hours: f64) -> String {
    if hours == 24.0 {
        "Once daily".to_string()
    } else if hours.fract() == 0.0 {
        format!("Every {} hours", hours as i64)
    } else {
        format!("Every {} hours", hours)
    }
}

/// Short local date and time, e.g. `"2024-03-01 08:30"`.
pub fn format_date(date: DateTime<Utc>) -> String {
    date.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::minutes(5)), "5m");
        assert_eq!(format_duration(Duration::seconds(59)), "0m");
        assert_eq!(format_duration(Duration::minutes(125)), "2h 5m");
        assert_eq!(format_duration(Duration::hours(-3)), "3h 0m");
    }

    #[test]
    fn test_format_relative_due() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            format_relative_due(now + Duration::minutes(90), now),
            "Due in 1h 30m"
        );
        assert_eq!(
            format_relative_due(now - Duration::minutes(15), now),
            "Overdue by 15m"
        );
        assert_eq!(format_relative_due(now, now), "Due in 0m");
    }

    #[test]
    fn test_format_frequency() {
        assert_eq!(format_frequency(24.0), "Once daily");
        assert_eq!(format_frequency(12.0), "Every 12 hours");
        assert_eq!(format_frequency(8.0), "Every 8 hours");
        assert_eq!(format_frequency(48.0), "Every 48 hours");
        assert_eq!(format_frequency(1.5), "Every 1.5 hours");
    }
}
