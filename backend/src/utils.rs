use chrono::{SecondsFormat, Utc};

/// Current UTC time as ISO-8601 with microseconds, e.g. `2026-10-19T08:15:02.123456+00:00`.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
