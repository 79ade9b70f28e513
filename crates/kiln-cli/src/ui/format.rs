//! Formatting for durations, clock labels and stage titles.

use chrono::{DateTime, Local, TimeZone};
use std::time::Duration;

/// Format duration in human-readable format.
///
/// ```
/// use std::time::Duration;
/// use kiln_cli::ui::format_duration;
///
/// assert_eq!(format_duration(Duration::from_millis(50)), "50ms");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();

    if total_ms < 1000 {
        format!("{}ms", total_ms)
    } else if total_ms < 60_000 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// Clock label for "updated at", e.g. `3:07pm`.
pub fn clock_label<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%-I:%M%P").to_string()
}

/// Clock label for the current local time.
pub fn now_label() -> String {
    clock_label(&Local::now())
}

/// Build stage suffix, to one decimal place. Only builds with neither
/// errors nor warnings report their time.
pub fn finished_in(elapsed_ms: u64, errors: usize, warnings: usize) -> Option<String> {
    if errors != 0 || warnings != 0 {
        return None;
    }
    let secs = format!("{:.1}", elapsed_ms as f64 / 1000.0);
    let secs = secs.strip_suffix(".0").unwrap_or(&secs);
    Some(format!("finished in {secs} seconds"))
}
