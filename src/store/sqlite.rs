use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::schema::SCHEMA;
use super::{CandidateFilter, FileClass, FileCounts, NodeScope, Store};
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

/// Fixed-width UTC timestamps so that SQL string comparison is chronological.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn expiry(ttl: Duration) -> Result<String> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|_| Error::Config(format!("lease ttl out of range: {ttl:?}")))?;
    Ok(format_datetime(&(Utc::now() + ttl)))
}

fn parse_column<T>(idx: usize, value: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown value '{value}'").into(),
        )
    })
}

fn map_constraint(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Error::AlreadyExists
        }
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            Error::BadRequest("referenced record does not exist".to_string())
        }
        _ => Error::from(e),
    }
}

/// Like `map_constraint`, but a second primary losing the race on the partial
/// unique index is a conflict rather than a duplicate node.
fn map_node_constraint(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(err, Some(msg))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && (msg.contains("is_primary") || msg.contains("idx_geo_nodes_primary")) =>
        {
            Error::Conflict("a primary node already exists".to_string())
        }
        _ => map_constraint(e),
    }
}

const NAMESPACE_COLUMNS: &str = "id, name, parent_id, created_at";

fn namespace_from_row(row: &Row<'_>) -> rusqlite::Result<Namespace> {
    Ok(Namespace {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

const PROJECT_COLUMNS: &str = "id, namespace_id, name, disk_path, repository_storage, wiki_enabled,
    last_repository_updated_at, last_wiki_updated_at, repository_size_bytes, created_at";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        namespace_id: row.get(1)?,
        name: row.get(2)?,
        disk_path: row.get(3)?,
        repository_storage: row.get(4)?,
        wiki_enabled: row.get(5)?,
        last_repository_updated_at: parse_optional_datetime(row.get(6)?),
        last_wiki_updated_at: parse_optional_datetime(row.get(7)?),
        repository_size_bytes: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

const NODE_COLUMNS: &str = "id, schema, host, port, relative_url_root, is_primary, enabled,
    repos_max_capacity, files_max_capacity, created_at, updated_at";

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<GeoNode> {
    let is_primary: bool = row.get(5)?;
    Ok(GeoNode {
        id: row.get(0)?,
        schema: row.get(1)?,
        host: row.get(2)?,
        port: row.get(3)?,
        relative_url_root: row.get(4)?,
        role: if is_primary {
            NodeRole::Primary
        } else {
            NodeRole::Secondary
        },
        enabled: row.get(6)?,
        namespace_ids: Vec::new(),
        repos_max_capacity: row.get(7)?,
        files_max_capacity: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        updated_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

fn load_node_namespaces(conn: &Connection, node: &mut GeoNode) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT namespace_id FROM geo_node_namespace_links WHERE geo_node_id = ?1 ORDER BY namespace_id",
    )?;
    let rows = stmt.query_map(params![node.id], |row| row.get(0))?;
    node.namespace_ids = rows.collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(())
}

fn insert_node_namespaces(conn: &Connection, node_id: i64, namespace_ids: &[i64]) -> Result<()> {
    for namespace_id in namespace_ids {
        conn.execute(
            "INSERT OR IGNORE INTO geo_node_namespace_links (geo_node_id, namespace_id) VALUES (?1, ?2)",
            params![node_id, namespace_id],
        )
        .map_err(map_constraint)?;
    }
    Ok(())
}

const REGISTRY_COLUMNS: &str = "node_id, project_id,
    repository_state, repository_last_synced_at, repository_last_successful_sync_at,
    repository_retry_count, repository_last_failure, repository_resync_requested_at,
    wiki_state, wiki_last_synced_at, wiki_last_successful_sync_at,
    wiki_retry_count, wiki_last_failure, wiki_resync_requested_at,
    created_at";

fn sync_record_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<SyncRecord> {
    Ok(SyncRecord {
        state: parse_column(base, row.get(base)?, SyncState::parse)?,
        last_synced_at: parse_optional_datetime(row.get(base + 1)?),
        last_successful_sync_at: parse_optional_datetime(row.get(base + 2)?),
        retry_count: row.get(base + 3)?,
        last_failure: row.get(base + 4)?,
        resync: row.get::<_, Option<String>>(base + 5)?.is_some(),
    })
}

fn registry_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectRegistry> {
    Ok(ProjectRegistry {
        node_id: row.get(0)?,
        project_id: row.get(1)?,
        repository: sync_record_from_row(row, 2)?,
        wiki: sync_record_from_row(row, 8)?,
        created_at: parse_datetime(&row.get::<_, String>(14)?),
    })
}

fn query_registry(conn: &Connection, node_id: i64, project_id: i64) -> Result<Option<ProjectRegistry>> {
    conn.query_row(
        &format!(
            "SELECT {REGISTRY_COLUMNS} FROM geo_project_registry WHERE node_id = ?1 AND project_id = ?2"
        ),
        params![node_id, project_id],
        registry_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn ensure_registry(conn: &Connection, node_id: i64, project_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO geo_project_registry (node_id, project_id, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(node_id, project_id) DO NOTHING",
        params![node_id, project_id, format_datetime(&Utc::now())],
    )
    .map_err(map_constraint)?;
    Ok(())
}

const EVENT_COLUMNS: &str = "id, event_type, project_id, source, created_at";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventLogEntry> {
    let source: Option<String> = row.get(3)?;
    Ok(EventLogEntry {
        id: row.get(0)?,
        event_type: parse_column(1, row.get(1)?, EventType::parse)?,
        project_id: row.get(2)?,
        source: match source {
            Some(s) => Some(parse_column(3, s, RepoKind::parse)?),
            None => None,
        },
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

// Every scoped query binds ?1 = node id and ?2 = whether namespace restrictions apply.
const SCOPE_CTE: &str = "WITH RECURSIVE scope(id) AS (
    SELECT namespace_id FROM geo_node_namespace_links WHERE geo_node_id = ?1
    UNION
    SELECT n.id FROM namespaces n JOIN scope s ON n.parent_id = s.id
)";

const VISIBLE_PROJECT: &str = "(?2 = 0 OR p.namespace_id IN (SELECT id FROM scope))";

const UNSYNCED_CONDITION: &str = "r.project_id IS NULL
    OR r.repository_last_synced_at IS NULL
    OR (?4 = 1 AND p.wiki_enabled = 1 AND r.wiki_last_synced_at IS NULL)";

const FAILED_CONDITION: &str = "r.repository_state = 'sync_failed'
    OR (?4 = 1 AND p.wiki_enabled = 1 AND r.wiki_state = 'sync_failed')";

const DIRTY_CONDITION: &str = "(r.repository_state = 'synced' AND (
        r.repository_resync_requested_at IS NOT NULL
        OR p.last_repository_updated_at > COALESCE(r.repository_last_successful_sync_at, '')))
    OR (?4 = 1 AND p.wiki_enabled = 1 AND r.wiki_state = 'synced' AND (
        r.wiki_resync_requested_at IS NOT NULL
        OR p.last_wiki_updated_at > COALESCE(r.wiki_last_successful_sync_at, '')))";

fn candidate_sql(condition: &str) -> String {
    format!(
        "{SCOPE_CTE}
         SELECT p.id FROM projects p
         LEFT JOIN geo_project_registry r ON r.project_id = p.id AND r.node_id = ?1
         WHERE {VISIBLE_PROJECT}
           AND p.repository_storage IN (SELECT value FROM json_each(?3))
           AND p.id > ?5
           AND ({condition})
         ORDER BY p.id
         LIMIT ?6"
    )
}

fn file_counts_sql(class: FileClass) -> String {
    let (table, visible, types) = match class {
        FileClass::LfsObjects => (
            "lfs_objects",
            "(?2 = 0 OR EXISTS (
                SELECT 1 FROM lfs_objects_projects lp JOIN projects p ON p.id = lp.project_id
                WHERE lp.lfs_object_id = o.id AND p.namespace_id IN (SELECT id FROM scope)))",
            "'lfs'",
        ),
        FileClass::Attachments => (
            "uploads",
            "(?2 = 0
                OR (o.model_type = 'Project' AND o.model_id IN (
                    SELECT p.id FROM projects p WHERE p.namespace_id IN (SELECT id FROM scope)))
                OR (o.model_type = 'Namespace' AND o.model_id IN (SELECT id FROM scope)))",
            "'attachment', 'avatar', 'file'",
        ),
    };
    let synced = format!(
        "EXISTS (SELECT 1 FROM geo_file_registry f
                 WHERE f.node_id = ?1 AND f.file_type IN ({types}) AND f.file_id = o.id)"
    );
    let failed = format!(
        "EXISTS (SELECT 1 FROM geo_file_failures ff
                 WHERE ff.node_id = ?1 AND ff.file_type IN ({types}) AND ff.file_id = o.id)"
    );
    format!(
        "{SCOPE_CTE}
         SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN {synced} THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN {failed} AND NOT {synced} THEN 1 ELSE 0 END), 0)
         FROM {table} o
         WHERE {visible}"
    )
}

impl SqliteStore {
    fn find_candidates(
        &self,
        condition: &str,
        filter: &CandidateFilter,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let storages = serde_json::to_string(&filter.storages)?;
        let conn = self.conn();
        let mut stmt = conn.prepare(&candidate_sql(condition))?;

        let rows = stmt.query_map(
            params![
                filter.scope.node_id,
                filter.scope.restricted,
                storages,
                filter.include_wikis,
                after_id,
                limit as i64,
            ],
            |row| row.get(0),
        )?;

        rows.collect::<std::result::Result<Vec<i64>, _>>()
            .map_err(Error::from)
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        self.conn().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // Namespace and project operations

    fn create_namespace(&self, name: &str, parent_id: Option<i64>) -> Result<Namespace> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO namespaces (name, parent_id, created_at) VALUES (?1, ?2, ?3)",
            params![name, parent_id, format_datetime(&created_at)],
        )
        .map_err(map_constraint)?;

        Ok(Namespace {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            parent_id,
            created_at,
        })
    }

    fn get_namespace(&self, id: i64) -> Result<Option<Namespace>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE id = ?1"),
            params![id],
            namespace_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn create_project(&self, project: &NewProject) -> Result<Project> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO projects (namespace_id, name, disk_path, repository_storage, wiki_enabled,
                                   last_repository_updated_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                project.namespace_id,
                project.name,
                project.disk_path,
                project.repository_storage,
                project.wiki_enabled,
                project.last_repository_updated_at.as_ref().map(format_datetime),
                format_datetime(&Utc::now()),
            ],
        )
        .map_err(map_constraint)?;

        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            params![id],
            project_from_row,
        )
        .map_err(Error::from)
    }

    fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            params![id],
            project_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn delete_project(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn touch_project(&self, id: i64, kind: RepoKind, at: DateTime<Utc>) -> Result<()> {
        let rows = self.conn().execute(
            &format!(
                "UPDATE projects SET last_{}_updated_at = ?1 WHERE id = ?2",
                kind.as_str()
            ),
            params![format_datetime(&at), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn expire_repository_cache(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE projects SET repository_size_bytes = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    // Upload and LFS object operations

    fn create_upload(&self, upload: &NewUpload) -> Result<Upload> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO uploads (model_type, model_id, uploader, path, size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                upload.model_type.as_str(),
                upload.model_id,
                upload.uploader,
                upload.path,
                upload.size,
                format_datetime(&created_at),
            ],
        )?;

        Ok(Upload {
            id: conn.last_insert_rowid(),
            model_type: upload.model_type,
            model_id: upload.model_id,
            uploader: upload.uploader.clone(),
            path: upload.path.clone(),
            size: upload.size,
            created_at,
        })
    }

    fn create_lfs_object(&self, oid: &str, size: i64) -> Result<LfsObject> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO lfs_objects (oid, size, created_at) VALUES (?1, ?2, ?3)",
            params![oid, size, format_datetime(&created_at)],
        )
        .map_err(map_constraint)?;

        Ok(LfsObject {
            id: conn.last_insert_rowid(),
            oid: oid.to_string(),
            size,
            created_at,
        })
    }

    fn link_lfs_object(&self, lfs_object_id: i64, project_id: i64) -> Result<()> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO lfs_objects_projects (lfs_object_id, project_id) VALUES (?1, ?2)",
                params![lfs_object_id, project_id],
            )
            .map_err(map_constraint)?;
        Ok(())
    }

    // Node operations

    fn create_node(&self, node: &NewNode) -> Result<GeoNode> {
        if node.role == NodeRole::Primary && self.get_primary_node()?.is_some() {
            return Err(Error::Conflict("a primary node already exists".to_string()));
        }

        let now = format_datetime(&Utc::now());
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO geo_nodes (schema, host, port, relative_url_root, is_primary, enabled,
                                    repos_max_capacity, files_max_capacity, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                node.schema,
                node.host,
                node.port,
                node.relative_url_root.trim_matches('/'),
                node.role == NodeRole::Primary,
                node.enabled,
                node.repos_max_capacity,
                node.files_max_capacity,
                now,
            ],
        )
        .map_err(map_node_constraint)?;

        let id = tx.last_insert_rowid();
        insert_node_namespaces(&tx, id, &node.namespace_ids)?;

        let mut created = tx.query_row(
            &format!("SELECT {NODE_COLUMNS} FROM geo_nodes WHERE id = ?1"),
            params![id],
            node_from_row,
        )?;
        load_node_namespaces(&tx, &mut created)?;

        tx.commit()?;
        Ok(created)
    }

    fn get_node(&self, id: i64) -> Result<Option<GeoNode>> {
        let conn = self.conn();
        let node = conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM geo_nodes WHERE id = ?1"),
                params![id],
                node_from_row,
            )
            .optional()?;

        match node {
            Some(mut node) => {
                load_node_namespaces(&conn, &mut node)?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    fn find_node_by_url(&self, url: &str) -> Result<Option<GeoNode>> {
        let wanted = normalize_url(url);
        Ok(self
            .list_nodes()?
            .into_iter()
            .find(|node| normalize_url(&node.url()) == wanted))
    }

    fn get_primary_node(&self) -> Result<Option<GeoNode>> {
        let conn = self.conn();
        let node = conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM geo_nodes WHERE is_primary = 1"),
                [],
                node_from_row,
            )
            .optional()?;

        match node {
            Some(mut node) => {
                load_node_namespaces(&conn, &mut node)?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    fn list_nodes(&self) -> Result<Vec<GeoNode>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {NODE_COLUMNS} FROM geo_nodes ORDER BY id"))?;

        let rows = stmt.query_map([], node_from_row)?;
        let mut nodes = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        for node in &mut nodes {
            load_node_namespaces(&conn, node)?;
        }
        Ok(nodes)
    }

    fn update_node(&self, node: &GeoNode) -> Result<()> {
        if node.is_primary() {
            if let Some(primary) = self.get_primary_node()? {
                if primary.id != node.id {
                    return Err(Error::Conflict("a primary node already exists".to_string()));
                }
            }
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx
            .execute(
                "UPDATE geo_nodes SET schema = ?1, host = ?2, port = ?3, relative_url_root = ?4,
                        is_primary = ?5, enabled = ?6, repos_max_capacity = ?7,
                        files_max_capacity = ?8, updated_at = ?9
                 WHERE id = ?10",
                params![
                    node.schema,
                    node.host,
                    node.port,
                    node.relative_url_root.trim_matches('/'),
                    node.is_primary(),
                    node.enabled,
                    node.repos_max_capacity,
                    node.files_max_capacity,
                    format_datetime(&Utc::now()),
                    node.id,
                ],
            )
            .map_err(map_node_constraint)?;

        if rows == 0 {
            return Err(Error::NotFound);
        }

        tx.execute(
            "DELETE FROM geo_node_namespace_links WHERE geo_node_id = ?1",
            params![node.id],
        )?;
        insert_node_namespaces(&tx, node.id, &node.namespace_ids)?;

        tx.commit()?;
        Ok(())
    }

    fn delete_node(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM geo_nodes WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Project registry operations

    fn get_project_registry(
        &self,
        node_id: i64,
        project_id: i64,
    ) -> Result<Option<ProjectRegistry>> {
        query_registry(&self.conn(), node_id, project_id)
    }

    fn record_sync_success(
        &self,
        node_id: i64,
        project_id: i64,
        kind: RepoKind,
        started_at: DateTime<Utc>,
    ) -> Result<ProjectRegistry> {
        let k = kind.as_str();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        ensure_registry(&tx, node_id, project_id)?;
        tx.execute(
            &format!(
                "UPDATE geo_project_registry SET
                    {k}_state = 'synced',
                    {k}_last_synced_at = ?3,
                    {k}_last_successful_sync_at = ?4,
                    {k}_retry_count = 0,
                    {k}_last_failure = NULL,
                    {k}_resync_requested_at = CASE
                        WHEN {k}_resync_requested_at > ?4 THEN {k}_resync_requested_at
                        ELSE NULL
                    END
                 WHERE node_id = ?1 AND project_id = ?2"
            ),
            params![
                node_id,
                project_id,
                format_datetime(&Utc::now()),
                format_datetime(&started_at),
            ],
        )?;

        let registry = query_registry(&tx, node_id, project_id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(registry)
    }

    fn record_sync_failure(
        &self,
        node_id: i64,
        project_id: i64,
        kind: RepoKind,
        reason: &str,
    ) -> Result<ProjectRegistry> {
        let k = kind.as_str();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        ensure_registry(&tx, node_id, project_id)?;
        tx.execute(
            &format!(
                "UPDATE geo_project_registry SET
                    {k}_state = 'sync_failed',
                    {k}_last_synced_at = ?3,
                    {k}_retry_count = {k}_retry_count + 1,
                    {k}_last_failure = ?4
                 WHERE node_id = ?1 AND project_id = ?2"
            ),
            params![node_id, project_id, format_datetime(&Utc::now()), reason],
        )?;

        let registry = query_registry(&tx, node_id, project_id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(registry)
    }

    fn request_resync(&self, node_id: i64, project_id: i64, kind: RepoKind) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        ensure_registry(&tx, node_id, project_id)?;
        tx.execute(
            &format!(
                "UPDATE geo_project_registry SET {}_resync_requested_at = ?3
                 WHERE node_id = ?1 AND project_id = ?2",
                kind.as_str()
            ),
            params![node_id, project_id, format_datetime(&Utc::now())],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_project_registry(&self, node_id: i64, project_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM geo_project_registry WHERE node_id = ?1 AND project_id = ?2",
            params![node_id, project_id],
        )?;
        Ok(rows > 0)
    }

    // Scheduler candidates

    fn find_unsynced_projects(
        &self,
        filter: &CandidateFilter,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<i64>> {
        self.find_candidates(UNSYNCED_CONDITION, filter, after_id, limit)
    }

    fn find_failed_projects(
        &self,
        filter: &CandidateFilter,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<i64>> {
        self.find_candidates(FAILED_CONDITION, filter, after_id, limit)
    }

    fn find_dirty_projects(
        &self,
        filter: &CandidateFilter,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<i64>> {
        self.find_candidates(DIRTY_CONDITION, filter, after_id, limit)
    }

    // Status counts

    fn count_projects(&self, scope: NodeScope) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            &format!("{SCOPE_CTE} SELECT COUNT(*) FROM projects p WHERE {VISIBLE_PROJECT}"),
            params![scope.node_id, scope.restricted],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_registries(
        &self,
        scope: NodeScope,
        kind: RepoKind,
        state: SyncState,
    ) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            &format!(
                "{SCOPE_CTE}
                 SELECT COUNT(*) FROM geo_project_registry r
                 JOIN projects p ON p.id = r.project_id
                 WHERE r.node_id = ?1 AND {VISIBLE_PROJECT} AND r.{}_state = ?3",
                kind.as_str()
            ),
            params![scope.node_id, scope.restricted, state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_files(&self, scope: NodeScope, class: FileClass) -> Result<FileCounts> {
        let conn = self.conn();
        conn.query_row(
            &file_counts_sql(class),
            params![scope.node_id, scope.restricted],
            |row| {
                Ok(FileCounts {
                    total: row.get::<_, i64>(0)? as u64,
                    synced: row.get::<_, i64>(1)? as u64,
                    failed: row.get::<_, i64>(2)? as u64,
                })
            },
        )
        .map_err(Error::from)
    }

    // File registry operations

    fn record_file_synced(&self, entry: &FileRegistry) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO geo_file_registry (node_id, file_type, file_id, bytes, sha256, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(node_id, file_type, file_id) DO UPDATE SET
                bytes = excluded.bytes, sha256 = excluded.sha256",
            params![
                entry.node_id,
                entry.file_type.as_str(),
                entry.file_id,
                entry.bytes,
                entry.sha256,
                format_datetime(&entry.created_at),
            ],
        )
        .map_err(map_constraint)?;
        tx.execute(
            "DELETE FROM geo_file_failures WHERE node_id = ?1 AND file_type = ?2 AND file_id = ?3",
            params![entry.node_id, entry.file_type.as_str(), entry.file_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn record_file_failure(
        &self,
        node_id: i64,
        file_type: FileType,
        file_id: i64,
        reason: &str,
    ) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO geo_file_failures (node_id, file_type, file_id, last_failure, last_attempt_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(node_id, file_type, file_id) DO UPDATE SET
                    retry_count = retry_count + 1,
                    last_failure = excluded.last_failure,
                    last_attempt_at = excluded.last_attempt_at",
                params![
                    node_id,
                    file_type.as_str(),
                    file_id,
                    reason,
                    format_datetime(&Utc::now()),
                ],
            )
            .map_err(map_constraint)?;
        Ok(())
    }

    // Event log operations

    fn append_event(&self, event: &NewEvent) -> Result<EventLogEntry> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO geo_event_log (event_type, project_id, source, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.event_type.as_str(),
                event.project_id,
                event.source.map(RepoKind::as_str),
                format_datetime(&created_at),
            ],
        )?;

        Ok(EventLogEntry {
            id: conn.last_insert_rowid(),
            event_type: event.event_type,
            project_id: event.project_id,
            source: event.source,
            created_at,
        })
    }

    fn get_event(&self, id: i64) -> Result<Option<EventLogEntry>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM geo_event_log WHERE id = ?1"),
            params![id],
            event_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn last_event(&self) -> Result<Option<EventLogEntry>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM geo_event_log ORDER BY id DESC LIMIT 1"),
            [],
            event_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_events_after(&self, after_id: i64, limit: usize) -> Result<Vec<EventLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM geo_event_log WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![after_id, limit as i64], event_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_event_log_state(&self, node_id: i64) -> Result<Option<EventLogState>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT node_id, event_id FROM geo_event_log_states WHERE node_id = ?1",
            params![node_id],
            |row| {
                Ok(EventLogState {
                    node_id: row.get(0)?,
                    event_id: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn advance_event_cursor(&self, node_id: i64, event_id: i64) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO geo_event_log_states (node_id, event_id)
             VALUES (?1, MIN(?2, (SELECT COALESCE(MAX(id), 0) FROM geo_event_log)))
             ON CONFLICT(node_id) DO UPDATE SET
                event_id = MAX(geo_event_log_states.event_id, excluded.event_id)",
            params![node_id, event_id],
        )
        .map_err(map_constraint)?;

        conn.query_row(
            "SELECT event_id FROM geo_event_log_states WHERE node_id = ?1",
            params![node_id],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    // Lease operations

    fn try_obtain_lease(&self, key: &str, uuid: &str, ttl: Duration) -> Result<bool> {
        let expires_at = expiry(ttl)?;
        let rows = self.conn().execute(
            "INSERT INTO geo_leases (key, uuid, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET uuid = excluded.uuid, expires_at = excluded.expires_at
             WHERE geo_leases.expires_at <= ?4",
            params![key, uuid, expires_at, format_datetime(&Utc::now())],
        )?;
        Ok(rows > 0)
    }

    fn renew_lease(&self, key: &str, uuid: &str, ttl: Duration) -> Result<bool> {
        let expires_at = expiry(ttl)?;
        let rows = self.conn().execute(
            "UPDATE geo_leases SET expires_at = ?3 WHERE key = ?1 AND uuid = ?2",
            params![key, uuid, expires_at],
        )?;
        Ok(rows > 0)
    }

    fn release_lease(&self, key: &str, uuid: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM geo_leases WHERE key = ?1 AND uuid = ?2",
            params![key, uuid],
        )?;
        Ok(rows > 0)
    }

    // Replication heartbeat

    fn write_heartbeat(&self, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO geo_heartbeats (id, beat_at) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET beat_at = excluded.beat_at",
            params![format_datetime(&at)],
        )?;
        Ok(())
    }

    fn last_heartbeat(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn();
        let beat: Option<String> = conn
            .query_row("SELECT beat_at FROM geo_heartbeats WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(parse_optional_datetime(beat))
    }
}

fn normalize_url(url: &str) -> String {
    let url = url.trim().to_ascii_lowercase();
    if url.ends_with('/') {
        url
    } else {
        format!("{url}/")
    }
}
