use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub namespace_id: i64,
    pub name: String,
    /// Path of the repository relative to its storage, without the `.git` suffix.
    pub disk_path: String,
    pub repository_storage: String,
    pub wiki_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_repository_updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_wiki_updated_at: Option<DateTime<Utc>>,
    /// Cached on-disk size; `None` once invalidated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_size_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub namespace_id: i64,
    pub name: String,
    pub disk_path: String,
    pub repository_storage: String,
    pub wiki_enabled: bool,
    #[serde(default)]
    pub last_repository_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Secondary,
}

impl NodeRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoNode {
    pub id: i64,
    pub schema: String,
    pub host: String,
    pub port: u16,
    pub relative_url_root: String,
    pub role: NodeRole,
    pub enabled: bool,
    /// Namespaces this node restricts replication to. Empty replicates everything.
    pub namespace_ids: Vec<i64>,
    pub repos_max_capacity: u32,
    pub files_max_capacity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeoNode {
    /// External URL, always ending in a slash. The port is left out when it is
    /// the scheme's default.
    #[must_use]
    pub fn url(&self) -> String {
        let authority = match (self.schema.as_str(), self.port) {
            ("http", 80) | ("https", 443) => self.host.clone(),
            _ => format!("{}:{}", self.host, self.port),
        };
        let root = self.relative_url_root.trim_matches('/');
        if root.is_empty() {
            format!("{}://{authority}/", self.schema)
        } else {
            format!("{}://{authority}/{root}/", self.schema)
        }
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.role == NodeRole::Primary
    }

    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.role == NodeRole::Secondary
    }

    #[must_use]
    pub fn restricts_namespaces(&self) -> bool {
        !self.namespace_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNode {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub relative_url_root: String,
    pub role: NodeRole,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub namespace_ids: Vec<i64>,
    #[serde(default = "default_repos_max_capacity")]
    pub repos_max_capacity: u32,
    #[serde(default = "default_files_max_capacity")]
    pub files_max_capacity: u32,
}

impl NewNode {
    /// Splits an external URL such as `https://geo.example.com:8443/gitlab/`.
    pub fn from_url(url: &str, role: NodeRole) -> Option<Self> {
        let (schema, rest) = url.split_once("://")?;
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().ok()?),
            None => (authority, if schema == "https" { 443 } else { 80 }),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self {
            schema: schema.to_string(),
            host: host.to_string(),
            port,
            relative_url_root: path.trim_matches('/').to_string(),
            role,
            enabled: true,
            namespace_ids: Vec::new(),
            repos_max_capacity: default_repos_max_capacity(),
            files_max_capacity: default_files_max_capacity(),
        })
    }
}

fn default_schema() -> String {
    "http".to_string()
}

fn default_true() -> bool {
    true
}

fn default_repos_max_capacity() -> u32 {
    25
}

fn default_files_max_capacity() -> u32 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    NeverSynced,
    Synced,
    SyncFailed,
}

impl SyncState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NeverSynced => "never_synced",
            Self::Synced => "synced",
            Self::SyncFailed => "sync_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "never_synced" => Some(Self::NeverSynced),
            "synced" => Some(Self::Synced),
            "sync_failed" => Some(Self::SyncFailed),
            _ => None,
        }
    }
}

/// The two independently replicated parts of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    Repository,
    Wiki,
}

impl RepoKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Wiki => "wiki",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "repository" => Some(Self::Repository),
            "wiki" => Some(Self::Wiki),
            _ => None,
        }
    }

    /// Suffix appended to a project's disk path.
    #[must_use]
    pub fn path_suffix(self) -> &'static str {
        match self {
            Self::Repository => ".git",
            Self::Wiki => ".wiki.git",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub state: SyncState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    /// Set when the primary reported a change after the last successful sync.
    pub resync: bool,
}

impl Default for SyncRecord {
    fn default() -> Self {
        Self {
            state: SyncState::NeverSynced,
            last_synced_at: None,
            last_successful_sync_at: None,
            retry_count: 0,
            last_failure: None,
            resync: false,
        }
    }
}

impl SyncRecord {
    /// Synced, but the source changed after the last successful sync.
    #[must_use]
    pub fn is_dirty(&self, source_updated_at: Option<DateTime<Utc>>) -> bool {
        if self.state != SyncState::Synced {
            return false;
        }
        if self.resync {
            return true;
        }
        match (source_updated_at, self.last_successful_sync_at) {
            (Some(updated), Some(synced)) => updated > synced,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRegistry {
    pub node_id: i64,
    pub project_id: i64,
    pub repository: SyncRecord,
    pub wiki: SyncRecord,
    pub created_at: DateTime<Utc>,
}

impl ProjectRegistry {
    #[must_use]
    pub fn new(node_id: i64, project_id: i64) -> Self {
        Self {
            node_id,
            project_id,
            repository: SyncRecord::default(),
            wiki: SyncRecord::default(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn record(&self, kind: RepoKind) -> &SyncRecord {
        match kind {
            RepoKind::Repository => &self.repository,
            RepoKind::Wiki => &self.wiki,
        }
    }

    pub fn record_mut(&mut self, kind: RepoKind) -> &mut SyncRecord {
        match kind {
            RepoKind::Repository => &mut self.repository,
            RepoKind::Wiki => &mut self.wiki,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Lfs,
    Attachment,
    Avatar,
    File,
}

impl FileType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lfs => "lfs",
            Self::Attachment => "attachment",
            Self::Avatar => "avatar",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lfs" => Some(Self::Lfs),
            "attachment" => Some(Self::Attachment),
            "avatar" => Some(Self::Avatar),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    /// File types counted as attachments in node status.
    pub const UPLOADS: [FileType; 3] = [Self::Attachment, Self::Avatar, Self::File];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRegistry {
    pub node_id: i64,
    pub file_type: FileType,
    pub file_id: i64,
    pub bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadModel {
    Project,
    Namespace,
    User,
}

impl UploadModel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "Project",
            Self::Namespace => "Namespace",
            Self::User => "User",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Project" => Some(Self::Project),
            "Namespace" => Some(Self::Namespace),
            "User" => Some(Self::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: i64,
    pub model_type: UploadModel,
    pub model_id: i64,
    pub uploader: String,
    pub path: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUpload {
    pub model_type: UploadModel,
    pub model_id: i64,
    pub uploader: String,
    pub path: String,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LfsObject {
    pub id: i64,
    pub oid: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RepositoryCreated,
    RepositoryUpdated,
    RepositoryDeleted,
    RepositoryRenamed,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RepositoryCreated => "repository_created",
            Self::RepositoryUpdated => "repository_updated",
            Self::RepositoryDeleted => "repository_deleted",
            Self::RepositoryRenamed => "repository_renamed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "repository_created" => Some(Self::RepositoryCreated),
            "repository_updated" => Some(Self::RepositoryUpdated),
            "repository_deleted" => Some(Self::RepositoryDeleted),
            "repository_renamed" => Some(Self::RepositoryRenamed),
            _ => None,
        }
    }
}

/// An event as submitted on the primary, before it is assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: EventType,
    pub project_id: i64,
    /// Which part of the project changed; only meaningful for updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<RepoKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: i64,
    pub event_type: EventType,
    pub project_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<RepoKind>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogState {
    pub node_id: i64,
    pub event_id: i64,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn node(relative_url_root: &str) -> GeoNode {
        GeoNode {
            id: 1,
            schema: "https".to_string(),
            host: "geo.example.com".to_string(),
            port: 443,
            relative_url_root: relative_url_root.to_string(),
            role: NodeRole::Secondary,
            enabled: true,
            namespace_ids: Vec::new(),
            repos_max_capacity: 25,
            files_max_capacity: 10,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_node_url() {
        assert_eq!(node("").url(), "https://geo.example.com/");
        assert_eq!(node("/gitlab/").url(), "https://geo.example.com/gitlab/");

        let mut custom = node("");
        custom.port = 8443;
        assert_eq!(custom.url(), "https://geo.example.com:8443/");
    }

    #[test]
    fn test_new_node_from_url() {
        let node = NewNode::from_url("https://geo.example.com:8443/gitlab/", NodeRole::Secondary)
            .unwrap();
        assert_eq!(node.schema, "https");
        assert_eq!(node.host, "geo.example.com");
        assert_eq!(node.port, 8443);
        assert_eq!(node.relative_url_root, "gitlab");

        let node = NewNode::from_url("http://primary-geo-node", NodeRole::Primary).unwrap();
        assert_eq!(node.port, 80);
        assert_eq!(node.relative_url_root, "");

        assert!(NewNode::from_url("primary-geo-node", NodeRole::Primary).is_none());
        assert!(NewNode::from_url("http://host:notaport/", NodeRole::Primary).is_none());
    }

    #[test]
    fn test_dirty_only_when_synced() {
        let now = Utc::now();
        let mut record = SyncRecord {
            state: SyncState::Synced,
            last_successful_sync_at: Some(now),
            ..SyncRecord::default()
        };

        assert!(!record.is_dirty(Some(now - Duration::minutes(5))));
        assert!(record.is_dirty(Some(now + Duration::minutes(5))));
        assert!(!record.is_dirty(None));

        record.resync = true;
        assert!(record.is_dirty(None));

        record.state = SyncState::SyncFailed;
        assert!(!record.is_dirty(Some(now + Duration::minutes(5))));
    }

    #[test]
    fn test_enum_round_trip_names() {
        assert_eq!(SyncState::parse("sync_failed"), Some(SyncState::SyncFailed));
        assert_eq!(NodeRole::parse("primary"), Some(NodeRole::Primary));
        assert_eq!(FileType::parse("avatar"), Some(FileType::Avatar));
        assert_eq!(EventType::parse("bogus"), None);
    }
}
