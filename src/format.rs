//! Duration text for the badge, the popup, and timestamps

/// Whole seconds, clamping negative and non-finite input to zero.
fn whole_seconds(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

/// Compact badge text: `"45m"`, `"1h30m"`.
pub fn format_duration(seconds: f64) -> String {
    let minutes = whole_seconds(seconds) / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{}h{}m", hours, minutes % 60)
    } else {
        format!("{minutes}m")
    }
}

/// Long form: `"1 hour 30 minutes"`, `"0 minutes"`.
pub fn format_duration_long(seconds: f64) -> String {
    let minutes = whole_seconds(seconds) / 60;
    let hours = minutes / 60;
    let rest = minutes % 60;

    match (hours, rest) {
        (0, m) => plural(m, "minute"),
        (h, 0) => plural(h, "hour"),
        (h, m) => format!("{} {}", plural(h, "hour"), plural(m, "minute")),
    }
}

/// Player-style position: `"1:30"`, `"1:01:01"`.
pub fn format_timestamp(seconds: f64) -> String {
    let total = whole_seconds(seconds);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn badge_text() {
        assert_eq!(format_duration(0.0), "0m");
        assert_eq!(format_duration(59.9), "0m");
        assert_eq!(format_duration(1200.0), "20m");
        assert_eq!(format_duration(3600.0), "1h0m");
        assert_eq!(format_duration(5400.0), "1h30m");
        assert_eq!(format_duration(36_061.0), "10h1m");
    }

    #[test]
    fn badge_text_rejects_garbage() {
        assert_eq!(format_duration(-5.0), "0m");
        assert_eq!(format_duration(f64::NAN), "0m");
        assert_eq!(format_duration(f64::INFINITY), "0m");
    }

    #[test]
    fn long_text() {
        assert_eq!(format_duration_long(0.0), "0 minutes");
        assert_eq!(format_duration_long(60.0), "1 minute");
        assert_eq!(format_duration_long(600.0), "10 minutes");
        assert_eq!(format_duration_long(3600.0), "1 hour");
        assert_eq!(format_duration_long(5400.0), "1 hour 30 minutes");
        assert_eq!(format_duration_long(7260.0), "2 hours 1 minute");
    }

    #[test]
    fn timestamps() {
        assert_eq!(format_timestamp(0.0), "0:00");
        assert_eq!(format_timestamp(90.0), "1:30");
        assert_eq!(format_timestamp(599.7), "9:59");
        assert_eq!(format_timestamp(3661.0), "1:01:01");
    }
}
