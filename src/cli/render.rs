//! Plain-text rendering of a node status snapshot.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::types::NodeStatus;

const UNKNOWN: &str = "UNKNOWN";

/// `1234567` as `1,234,567`.
#[must_use]
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `synced/total (pct%)`.
#[must_use]
pub fn format_count_and_percentage(synced: u64, total: u64, percentage: f64) -> String {
    format!(
        "{}/{} ({percentage:.2}%)",
        format_number(synced),
        format_number(total)
    )
}

/// Seconds as `1w 2d 3h 4m 5s`, skipping zero units.
#[must_use]
pub fn format_lag(lag: Option<i64>) -> String {
    let Some(seconds) = lag else {
        return UNKNOWN.to_string();
    };
    if seconds <= 0 {
        return "0s".to_string();
    }

    const UNITS: [(i64, &str); 5] = [
        (7 * 24 * 3600, "w"),
        (24 * 3600, "d"),
        (3600, "h"),
        (60, "m"),
        (1, "s"),
    ];

    let mut remaining = seconds;
    let mut parts = Vec::new();
    for (size, suffix) in UNITS {
        let count = remaining / size;
        if count > 0 {
            parts.push(format!("{count}{suffix}"));
            remaining %= size;
        }
    }
    parts.join(" ")
}

/// `id (date)` or `UNKNOWN`.
#[must_use]
pub fn format_event(id: Option<i64>, date: Option<DateTime<Utc>>) -> String {
    match (id, date) {
        (Some(id), Some(date)) => format!("{id} ({})", date.format("%Y-%m-%d %H:%M:%S UTC")),
        (Some(id), None) => id.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

#[must_use]
pub fn render_status(status: &NodeStatus) -> String {
    let mut out = String::new();
    let health = if status.healthy { "Healthy" } else { "Unhealthy" };

    let _ = writeln!(out, "Health status:          {health}");
    if !status.health.is_empty() {
        let _ = writeln!(out, "Health:                 {}", status.health);
    }
    let _ = writeln!(
        out,
        "Replication lag:        {}",
        format_lag(status.db_replication_lag)
    );
    let _ = writeln!(
        out,
        "Repositories:           {}  failed: {}",
        format_count_and_percentage(
            status.repositories_synced_count,
            status.repositories_count,
            status.repositories_synced_in_percentage
        ),
        format_number(status.repositories_failed_count)
    );
    let _ = writeln!(
        out,
        "LFS objects:            {}  failed: {}",
        format_count_and_percentage(
            status.lfs_objects_synced_count,
            status.lfs_objects_count,
            status.lfs_objects_synced_in_percentage
        ),
        format_number(status.lfs_objects_failed_count)
    );
    let _ = writeln!(
        out,
        "Attachments:            {}  failed: {}",
        format_count_and_percentage(
            status.attachments_synced_count,
            status.attachments_count,
            status.attachments_synced_in_percentage
        ),
        format_number(status.attachments_failed_count)
    );
    let _ = writeln!(
        out,
        "Last event ID seen:     {}",
        format_event(status.last_event_id, status.last_event_date)
    );
    let _ = writeln!(
        out,
        "Last event processed:   {}",
        format_event(status.cursor_last_event_id, status.cursor_last_event_date)
    );

    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_lag() {
        assert_eq!(format_lag(None), "UNKNOWN");
        assert_eq!(format_lag(Some(0)), "0s");
        assert_eq!(format_lag(Some(65)), "1m 5s");
        assert_eq!(
            format_lag(Some(7 * 86400 + 2 * 86400 + 3 * 3600 + 4 * 60 + 5)),
            "1w 2d 3h 4m 5s"
        );
    }

    #[test]
    fn test_render_status() {
        let status = NodeStatus {
            healthy: true,
            repositories_count: 4000,
            repositories_synced_count: 1000,
            repositories_synced_in_percentage: 25.0,
            last_event_id: Some(42),
            last_event_date: Some(Utc.with_ymd_and_hms(2017, 5, 1, 12, 30, 0).unwrap()),
            ..NodeStatus::default()
        };

        let text = render_status(&status);
        assert!(text.contains("Health status:          Healthy"));
        assert!(text.contains("1,000/4,000 (25.00%)"));
        assert!(text.contains("Replication lag:        UNKNOWN"));
        assert!(text.contains("42 (2017-05-01 12:30:00 UTC)"));
        assert!(text.contains("Last event processed:   UNKNOWN"));
    }
}
