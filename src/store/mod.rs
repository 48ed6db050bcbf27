mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::GeoFeatures;
use crate::error::Result;
use crate::types::*;

/// Which projects and files a node sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeScope {
    pub node_id: i64,
    /// Only namespaces linked to the node, and their descendants, are visible.
    pub restricted: bool,
}

impl NodeScope {
    #[must_use]
    pub fn for_node(node: &GeoNode, features: &GeoFeatures) -> Self {
        Self {
            node_id: node.id,
            restricted: features.namespace_restrictions && node.restricts_namespaces(),
        }
    }
}

/// Narrows scheduler candidates beyond node visibility.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    pub scope: NodeScope,
    /// Repository storages that are currently reachable.
    pub storages: Vec<String>,
    pub include_wikis: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    LfsObjects,
    Attachments,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub total: u64,
    pub synced: u64,
    pub failed: u64,
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;
    fn ping(&self) -> Result<()>;

    // Namespace and project operations
    fn create_namespace(&self, name: &str, parent_id: Option<i64>) -> Result<Namespace>;
    fn get_namespace(&self, id: i64) -> Result<Option<Namespace>>;
    fn create_project(&self, project: &NewProject) -> Result<Project>;
    fn get_project(&self, id: i64) -> Result<Option<Project>>;
    fn delete_project(&self, id: i64) -> Result<bool>;
    fn touch_project(&self, id: i64, kind: RepoKind, at: DateTime<Utc>) -> Result<()>;
    fn expire_repository_cache(&self, id: i64) -> Result<()>;

    // Upload and LFS object operations
    fn create_upload(&self, upload: &NewUpload) -> Result<Upload>;
    fn create_lfs_object(&self, oid: &str, size: i64) -> Result<LfsObject>;
    fn link_lfs_object(&self, lfs_object_id: i64, project_id: i64) -> Result<()>;

    // Node operations
    fn create_node(&self, node: &NewNode) -> Result<GeoNode>;
    fn get_node(&self, id: i64) -> Result<Option<GeoNode>>;
    fn find_node_by_url(&self, url: &str) -> Result<Option<GeoNode>>;
    fn get_primary_node(&self) -> Result<Option<GeoNode>>;
    fn list_nodes(&self) -> Result<Vec<GeoNode>>;
    fn update_node(&self, node: &GeoNode) -> Result<()>;
    fn delete_node(&self, id: i64) -> Result<bool>;

    // Project registry operations
    fn get_project_registry(&self, node_id: i64, project_id: i64)
    -> Result<Option<ProjectRegistry>>;
    /// Marks a successful attempt that started at `started_at`. The attempt
    /// start becomes the successful-sync watermark, so primary updates that land
    /// during the fetch keep the project dirty. A resync request newer than the
    /// attempt survives.
    fn record_sync_success(
        &self,
        node_id: i64,
        project_id: i64,
        kind: RepoKind,
        started_at: DateTime<Utc>,
    ) -> Result<ProjectRegistry>;
    fn record_sync_failure(
        &self,
        node_id: i64,
        project_id: i64,
        kind: RepoKind,
        reason: &str,
    ) -> Result<ProjectRegistry>;
    fn request_resync(&self, node_id: i64, project_id: i64, kind: RepoKind) -> Result<()>;
    fn delete_project_registry(&self, node_id: i64, project_id: i64) -> Result<bool>;

    // Scheduler candidates, ordered by project id and paged by `after_id`
    fn find_unsynced_projects(
        &self,
        filter: &CandidateFilter,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<i64>>;
    fn find_failed_projects(
        &self,
        filter: &CandidateFilter,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<i64>>;
    fn find_dirty_projects(
        &self,
        filter: &CandidateFilter,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<i64>>;

    // Status counts
    fn count_projects(&self, scope: NodeScope) -> Result<u64>;
    fn count_registries(&self, scope: NodeScope, kind: RepoKind, state: SyncState)
    -> Result<u64>;
    fn count_files(&self, scope: NodeScope, class: FileClass) -> Result<FileCounts>;

    // File registry operations
    fn record_file_synced(&self, entry: &FileRegistry) -> Result<()>;
    fn record_file_failure(
        &self,
        node_id: i64,
        file_type: FileType,
        file_id: i64,
        reason: &str,
    ) -> Result<()>;

    // Event log operations
    fn append_event(&self, event: &NewEvent) -> Result<EventLogEntry>;
    fn get_event(&self, id: i64) -> Result<Option<EventLogEntry>>;
    fn last_event(&self) -> Result<Option<EventLogEntry>>;
    fn list_events_after(&self, after_id: i64, limit: usize) -> Result<Vec<EventLogEntry>>;
    fn get_event_log_state(&self, node_id: i64) -> Result<Option<EventLogState>>;
    /// Moves the cursor forward to `event_id`, clamped to the newest event.
    /// Never moves it backward. Returns the resulting cursor.
    fn advance_event_cursor(&self, node_id: i64, event_id: i64) -> Result<i64>;

    // Lease operations
    fn try_obtain_lease(&self, key: &str, uuid: &str, ttl: Duration) -> Result<bool>;
    fn renew_lease(&self, key: &str, uuid: &str, ttl: Duration) -> Result<bool>;
    fn release_lease(&self, key: &str, uuid: &str) -> Result<bool>;

    // Replication heartbeat
    fn write_heartbeat(&self, at: DateTime<Utc>) -> Result<()>;
    fn last_heartbeat(&self) -> Result<Option<DateTime<Utc>>>;
}
