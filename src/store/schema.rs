pub const SCHEMA: &str = r#"
-- Namespaces form a tree; selective sync includes every descendant
CREATE TABLE IF NOT EXISTS namespaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    parent_id INTEGER REFERENCES namespaces(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL
);

-- Projects as replicated from the primary database
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace_id INTEGER NOT NULL REFERENCES namespaces(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    disk_path TEXT NOT NULL UNIQUE,
    repository_storage TEXT NOT NULL DEFAULT 'default',
    wiki_enabled INTEGER NOT NULL DEFAULT 1,
    last_repository_updated_at TEXT,
    last_wiki_updated_at TEXT,
    repository_size_bytes INTEGER,   -- NULL = not cached
    created_at TEXT NOT NULL
);

-- Installations participating in replication
CREATE TABLE IF NOT EXISTS geo_nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    schema TEXT NOT NULL DEFAULT 'http',
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    relative_url_root TEXT NOT NULL DEFAULT '',
    is_primary INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    repos_max_capacity INTEGER NOT NULL DEFAULT 25,
    files_max_capacity INTEGER NOT NULL DEFAULT 10,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE(schema, host, port, relative_url_root)
);

-- Namespace restrictions (selective sync)
CREATE TABLE IF NOT EXISTS geo_node_namespace_links (
    geo_node_id INTEGER NOT NULL REFERENCES geo_nodes(id) ON DELETE CASCADE,
    namespace_id INTEGER NOT NULL REFERENCES namespaces(id) ON DELETE CASCADE,
    PRIMARY KEY (geo_node_id, namespace_id)
);

-- Per (node, project) sync state, repository and wiki tracked independently
CREATE TABLE IF NOT EXISTS geo_project_registry (
    node_id INTEGER NOT NULL REFERENCES geo_nodes(id) ON DELETE CASCADE,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,

    repository_state TEXT NOT NULL DEFAULT 'never_synced',
    repository_last_synced_at TEXT,             -- last attempt
    repository_last_successful_sync_at TEXT,
    repository_retry_count INTEGER NOT NULL DEFAULT 0,
    repository_last_failure TEXT,
    repository_resync_requested_at TEXT,        -- NULL = clean

    wiki_state TEXT NOT NULL DEFAULT 'never_synced',
    wiki_last_synced_at TEXT,
    wiki_last_successful_sync_at TEXT,
    wiki_retry_count INTEGER NOT NULL DEFAULT 0,
    wiki_last_failure TEXT,
    wiki_resync_requested_at TEXT,

    created_at TEXT NOT NULL,
    PRIMARY KEY (node_id, project_id)
);

-- File-like objects
CREATE TABLE IF NOT EXISTS uploads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_type TEXT NOT NULL,    -- Project | Namespace | User
    model_id INTEGER NOT NULL,
    uploader TEXT NOT NULL,
    path TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lfs_objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    oid TEXT NOT NULL UNIQUE,
    size INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lfs_objects_projects (
    lfs_object_id INTEGER NOT NULL REFERENCES lfs_objects(id) ON DELETE CASCADE,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    PRIMARY KEY (lfs_object_id, project_id)
);

-- A row exists only once the file has been transferred successfully
CREATE TABLE IF NOT EXISTS geo_file_registry (
    node_id INTEGER NOT NULL REFERENCES geo_nodes(id) ON DELETE CASCADE,
    file_type TEXT NOT NULL,
    file_id INTEGER NOT NULL,
    bytes INTEGER NOT NULL DEFAULT 0,
    sha256 TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (node_id, file_type, file_id)
);

CREATE TABLE IF NOT EXISTS geo_file_failures (
    node_id INTEGER NOT NULL REFERENCES geo_nodes(id) ON DELETE CASCADE,
    file_type TEXT NOT NULL,
    file_id INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 1,
    last_failure TEXT,
    last_attempt_at TEXT NOT NULL,
    PRIMARY KEY (node_id, file_type, file_id)
);

-- Append-only, ids never reused
CREATE TABLE IF NOT EXISTS geo_event_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    project_id INTEGER NOT NULL,
    source TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS geo_event_log_states (
    node_id INTEGER PRIMARY KEY REFERENCES geo_nodes(id) ON DELETE CASCADE,
    event_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS geo_leases (
    key TEXT PRIMARY KEY,
    uuid TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS geo_heartbeats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    beat_at TEXT NOT NULL
);

-- Create indexes
CREATE UNIQUE INDEX IF NOT EXISTS idx_geo_nodes_primary ON geo_nodes(is_primary) WHERE is_primary = 1;
CREATE INDEX IF NOT EXISTS idx_namespaces_parent ON namespaces(parent_id);
CREATE INDEX IF NOT EXISTS idx_projects_namespace ON projects(namespace_id);
CREATE INDEX IF NOT EXISTS idx_project_registry_project ON geo_project_registry(project_id);
CREATE INDEX IF NOT EXISTS idx_uploads_model ON uploads(model_type, model_id);
CREATE INDEX IF NOT EXISTS idx_lfs_objects_projects_project ON lfs_objects_projects(project_id);
"#;
