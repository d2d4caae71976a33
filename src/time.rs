use chrono::{DateTime, Utc};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Formats `created_at` relative to `now`, e.g. "3 hours ago".
///
/// Anything a month or older is shown as a date instead.
pub fn relative_time(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - created_at).num_seconds();
    if elapsed < MINUTE {
        return "just now".to_string();
    }
    if elapsed < HOUR {
        return plural(elapsed / MINUTE, "minute");
    }
    if elapsed < DAY {
        return plural(elapsed / HOUR, "hour");
    }
    if elapsed < 30 * DAY {
        return plural(elapsed / DAY, "day");
    }
    created_at.format("%b %d, %Y").to_string()
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}
