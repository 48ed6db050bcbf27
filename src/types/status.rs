use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time replication snapshot of one node.
///
/// Counts default to zero when no data is available. Only the event, cursor and
/// lag fields distinguish "unknown" (`None`) from zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub healthy: bool,
    pub health: String,
    /// Seconds behind the primary database.
    pub db_replication_lag: Option<i64>,

    pub repositories_count: u64,
    pub repositories_synced_count: u64,
    pub repositories_synced_in_percentage: f64,
    pub repositories_failed_count: u64,

    pub lfs_objects_count: u64,
    pub lfs_objects_synced_count: u64,
    pub lfs_objects_synced_in_percentage: f64,
    pub lfs_objects_failed_count: u64,

    pub attachments_count: u64,
    pub attachments_synced_count: u64,
    pub attachments_synced_in_percentage: f64,
    pub attachments_failed_count: u64,

    pub last_event_id: Option<i64>,
    pub last_event_date: Option<DateTime<Utc>>,
    pub cursor_last_event_id: Option<i64>,
    pub cursor_last_event_date: Option<DateTime<Utc>>,
}

/// `synced / total * 100`, zero when there is nothing to sync.
#[must_use]
pub fn sync_percentage(synced: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    synced as f64 / total as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_percentage() {
        assert_eq!(sync_percentage(0, 0), 0.0);
        assert_eq!(sync_percentage(5, 0), 0.0);
        assert!((sync_percentage(1, 4) - 25.0).abs() < 1e-9);
        assert!((sync_percentage(2, 2) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_fields_serialize_as_null() {
        let json = serde_json::to_value(NodeStatus::default()).unwrap();
        assert!(json["last_event_id"].is_null());
        assert!(json["cursor_last_event_date"].is_null());
        assert!(json["db_replication_lag"].is_null());
        assert_eq!(json["repositories_count"], 0);
        assert_eq!(json["attachments_synced_in_percentage"], 0.0);
    }
}
