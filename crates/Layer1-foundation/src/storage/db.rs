//! SQLite registry store
//!
//! 레지스트리 노드를 하나의 테이블에 xpath 단위로 저장:
//! - `xpath`: 노드 경로 (PK)
//! - `parent_xpath`: 부모 경로
//! - `leaves`: 리프 값 (JSON object)
//! - `last_modified`: RFC3339 타임스탬프
//!
//! ## Migration System
//!
//! Database schema is versioned. Migrations run automatically on startup.
//! - Version 1: Initial schema (registry_nodes)
//! - Version 2: Index on parent_xpath for child listing

use super::registry::{
    assemble, flatten_children, flatten_node, path, split_leaves, DataNode, FetchDescendants,
    NodeRecord, RegistryStore, ROOT_PATH,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Database file name inside the data directory
pub const REGISTRY_DB_FILE: &str = "registry.db";

/// Registry store persisted in SQLite
#[derive(Clone)]
pub struct SqliteRegistryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistryStore {
    /// Open (or create) `<data_dir>/registry.db`
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

        let db_path = data_dir.join(REGISTRY_DB_FILE);
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        store.run_migrations()?;

        info!("Registry database opened at {}", db_path.display());
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        store.run_migrations()?;
        Ok(store)
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Registry nodes
            CREATE TABLE IF NOT EXISTS registry_nodes (
                xpath TEXT PRIMARY KEY,
                parent_xpath TEXT NOT NULL,
                leaves TEXT NOT NULL DEFAULT '{}',
                last_modified TEXT
            );

            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Registry schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running registry migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;

        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => {
                    warn!("Unknown migration version: {}", version);
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

            info!("Applied migration to version {}", version);
        }

        Ok(())
    }

    fn migrate_v2(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_registry_nodes_parent ON registry_nodes(parent_xpath)",
            [],
        )
        .map_err(|e| Error::Storage(format!("Failed to create parent index: {}", e)))?;
        Ok(())
    }

    // ========================================================================
    // Blocking helpers
    // ========================================================================

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("Storage task failed: {}", e)))?
    }

    fn load_record(conn: &Connection, xpath: &str) -> Result<Option<NodeRecord>> {
        if xpath == ROOT_PATH {
            return Ok(Some(NodeRecord {
                xpath: ROOT_PATH.to_string(),
                leaves: Map::new(),
                last_modified: None,
            }));
        }
        let row = conn
            .query_row(
                "SELECT xpath, leaves, last_modified FROM registry_nodes WHERE xpath = ?1",
                params![xpath],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", xpath, e)))?;
        row.map(Self::decode_row).transpose()
    }

    fn load_descendants(conn: &Connection, xpath: &str) -> Result<Vec<NodeRecord>> {
        let pattern = if xpath == ROOT_PATH {
            "/%".to_string()
        } else {
            format!("{}/%", escape_like(xpath))
        };
        let mut stmt = conn
            .prepare(
                "SELECT xpath, leaves, last_modified FROM registry_nodes \
                 WHERE xpath LIKE ?1 ESCAPE '\\' ORDER BY xpath",
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![pattern], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(|e| Error::Storage(format!("Failed to read subtree of {}: {}", xpath, e)))?;

        let mut records = Vec::new();
        for row in rows {
            let record = Self::decode_row(
                row.map_err(|e| Error::Storage(format!("Failed to read row: {}", e)))?,
            )?;
            if path::is_descendant(xpath, &record.xpath) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn decode_row(row: (String, String, Option<String>)) -> Result<NodeRecord> {
        let (xpath, leaves, last_modified) = row;
        let leaves: Map<String, Value> = serde_json::from_str(&leaves)?;
        let last_modified = last_modified
            .map(|ts| {
                DateTime::parse_from_rfc3339(&ts)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| Error::Storage(format!("Bad timestamp on {}: {}", xpath, e)))
            })
            .transpose()?;
        Ok(NodeRecord {
            xpath,
            leaves,
            last_modified,
        })
    }

    fn node_exists(conn: &Connection, xpath: &str) -> Result<bool> {
        if xpath == ROOT_PATH {
            return Ok(true);
        }
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM registry_nodes WHERE xpath = ?1",
                params![xpath],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to check {}: {}", xpath, e)))?;
        Ok(found.is_some())
    }

    fn insert_records(tx: &Transaction<'_>, records: &[NodeRecord]) -> Result<()> {
        for r in records {
            let parent = path::parent(&r.xpath).unwrap_or_else(|| ROOT_PATH.to_string());
            tx.execute(
                "INSERT INTO registry_nodes (xpath, parent_xpath, leaves, last_modified) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    r.xpath,
                    parent,
                    serde_json::to_string(&r.leaves)?,
                    r.last_modified.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| Error::Storage(format!("Failed to insert {}: {}", r.xpath, e)))?;
        }
        Ok(())
    }

    fn delete_subtree(tx: &Transaction<'_>, xpath: &str) -> Result<()> {
        tx.execute(
            "DELETE FROM registry_nodes WHERE xpath = ?1 OR xpath LIKE ?2 ESCAPE '\\'",
            params![xpath, format!("{}/%", escape_like(xpath))],
        )
        .map_err(|e| Error::Storage(format!("Failed to delete {}: {}", xpath, e)))?;
        Ok(())
    }
}

/// Escape LIKE wildcards in a literal prefix
fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl RegistryStore for SqliteRegistryStore {
    async fn get(&self, xpath: &str, fetch: FetchDescendants) -> Result<DataNode> {
        let xpath = xpath.to_string();
        self.with_conn(move |conn| {
            let root = Self::load_record(conn, &xpath)?
                .ok_or_else(|| Error::NotFound(format!("Data node {}", xpath)))?;
            let below = if fetch == FetchDescendants::Omit {
                Vec::new()
            } else {
                Self::load_descendants(conn, &xpath)?
            };
            Ok(assemble(root, below, fetch))
        })
        .await
    }

    async fn children(&self, xpath: &str) -> Result<Vec<DataNode>> {
        Ok(self.get(xpath, FetchDescendants::All).await?.children)
    }

    async fn create_child(
        &self,
        parent_xpath: &str,
        json: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let records = flatten_children(parent_xpath, json, timestamp)?;
        let parent_xpath = parent_xpath.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;
            if !Self::node_exists(&tx, &parent_xpath)? {
                return Err(Error::NotFound(format!("Parent data node {}", parent_xpath)));
            }
            for r in &records {
                if Self::node_exists(&tx, &r.xpath)? {
                    return Err(Error::AlreadyExists(format!("Data node {}", r.xpath)));
                }
            }
            Self::insert_records(&tx, &records)?;
            tx.commit()
                .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))
        })
        .await
    }

    async fn update_leaves(
        &self,
        xpath: &str,
        json: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::Validation("Leaves payload must be a JSON object".to_string()))?;
        let (leaves, nested) = split_leaves(obj);
        if !nested.is_empty() {
            return Err(Error::Validation(format!(
                "Leaf update of {} contains child nodes",
                xpath
            )));
        }

        let xpath = xpath.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;
            let mut record = Self::load_record(&tx, &xpath)?
                .filter(|r| r.xpath != ROOT_PATH)
                .ok_or_else(|| Error::NotFound(format!("Data node {}", xpath)))?;
            record.leaves.extend(leaves);
            let last_modified = timestamp.or(record.last_modified);
            tx.execute(
                "UPDATE registry_nodes SET leaves = ?2, last_modified = ?3 WHERE xpath = ?1",
                params![
                    xpath,
                    serde_json::to_string(&record.leaves)?,
                    last_modified.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| Error::Storage(format!("Failed to update {}: {}", xpath, e)))?;
            tx.commit()
                .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))
        })
        .await
    }

    async fn replace_node(
        &self,
        xpath: &str,
        json: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::Validation("Node payload must be a JSON object".to_string()))?;
        let mut records = Vec::new();
        flatten_node(xpath, obj, timestamp, &mut records)?;

        let xpath = xpath.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;
            if xpath == ROOT_PATH || !Self::node_exists(&tx, &xpath)? {
                return Err(Error::NotFound(format!("Data node {}", xpath)));
            }
            Self::delete_subtree(&tx, &xpath)?;
            Self::insert_records(&tx, &records)?;
            tx.commit()
                .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))
        })
        .await
    }

    async fn delete_node(&self, xpath: &str) -> Result<()> {
        let xpath = xpath.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;
            if xpath == ROOT_PATH || !Self::node_exists(&tx, &xpath)? {
                return Err(Error::NotFound(format!("Data node {}", xpath)));
            }
            Self::delete_subtree(&tx, &xpath)?;
            tx.commit()
                .map_err(|e| Error::Storage(format!("Failed to commit: {}", e)))
        })
        .await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_version() {
        let store = SqliteRegistryStore::in_memory().expect("Failed to create storage");
        assert_eq!(store.get_schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("/a_b%c"), "/a\\_b\\%c");
    }

    #[tokio::test]
    async fn test_create_read_update() {
        let store = SqliteRegistryStore::in_memory().expect("Failed to create storage");
        store
            .create_child("/", &json!({ "dmi-registry": {} }), None)
            .await
            .unwrap();
        store
            .create_child(
                "/dmi-registry",
                &json!({ "cm-handles": [{
                    "id": "cmh_1",
                    "dmi-service-name": "http://dmi:8080",
                    "state": { "cm-handle-state": "ADVISED" }
                }]}),
                Some(Utc::now()),
            )
            .await
            .unwrap();

        let state = "/dmi-registry/cm-handles[@id='cmh_1']/state";
        store
            .update_leaves(state, &json!({ "cm-handle-state": "READY" }), Some(Utc::now()))
            .await
            .unwrap();

        let handle = store
            .get("/dmi-registry/cm-handles[@id='cmh_1']", FetchDescendants::All)
            .await
            .unwrap();
        assert_eq!(handle.leaf_str("dmi-service-name"), Some("http://dmi:8080"));
        let state_node = handle.child("state").expect("state child");
        assert_eq!(state_node.leaf_str("cm-handle-state"), Some("READY"));
        assert!(state_node.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = SqliteRegistryStore::new(dir.path()).unwrap();
            store
                .create_child("/", &json!({ "dmi-registry": {} }), None)
                .await
                .unwrap();
        }

        let reopened = SqliteRegistryStore::new(dir.path()).unwrap();
        assert!(reopened
            .get("/dmi-registry", FetchDescendants::Omit)
            .await
            .is_ok());
        let dup = reopened
            .create_child("/", &json!({ "dmi-registry": {} }), None)
            .await;
        assert!(matches!(dup, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_subtree_only() {
        let store = SqliteRegistryStore::in_memory().unwrap();
        store
            .create_child("/", &json!({ "r": { "a": { "x": 1 }, "ab": { "y": 2 } } }), None)
            .await
            .unwrap();

        store.delete_node("/r/a").await.unwrap();
        let root = store.get("/r", FetchDescendants::All).await.unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name(), "ab");
        assert!(matches!(
            store.delete_node("/r/a").await,
            Err(Error::NotFound(_))
        ));
    }
}
