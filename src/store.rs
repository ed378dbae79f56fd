//! SQLite-backed index store.
//!
//! One row per `(connection_id, bucket)`; the record payload is a
//! MessagePack blob. Rows are replaced wholesale in a single statement, so
//! readers always see either the previous finalized index or the new one.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::error::StoreError;
use crate::model::{BucketIndex, BucketKey, IndexRecord, IndexStats};

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS bucket_indexes (
    connection_id  TEXT NOT NULL,
    bucket         TEXT NOT NULL,
    built_at_ms    INTEGER NOT NULL,
    total_objects  INTEGER NOT NULL,
    size_bytes     INTEGER NOT NULL,
    is_complete    INTEGER NOT NULL,
    records        BLOB NOT NULL,
    PRIMARY KEY (connection_id, bucket)
);
";

pub struct IndexStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl IndexStore {
    /// Open (or create) the store at `path`, applying pragmas and schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            r"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        conn.execute_batch(SCHEMA_SQL)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!(path = %path.display(), "index store opened");
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the stored index for its key.
    pub fn put(&self, index: &BucketIndex) -> Result<(), StoreError> {
        let blob = rmp_serde::to_vec(&index.records)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO bucket_indexes
             (connection_id, bucket, built_at_ms, total_objects, size_bytes, is_complete, records)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                index.key.connection_id,
                index.key.bucket,
                index.built_at_ms,
                index.total_objects as i64,
                index.size_bytes as i64,
                index.is_complete,
                blob,
            ],
        )?;
        Ok(())
    }

    /// Load the full index, record payload included.
    pub fn get(&self, key: &BucketKey) -> Result<BucketIndex, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT built_at_ms, total_objects, size_bytes, is_complete, records
                 FROM bucket_indexes WHERE connection_id = ?1 AND bucket = ?2",
                params![key.connection_id, key.bucket],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, bool>(3)?,
                        r.get::<_, Vec<u8>>(4)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::IndexNotFound(key.clone()))?;

        let records: Vec<IndexRecord> = rmp_serde::from_slice(&row.4)?;
        Ok(BucketIndex {
            key: key.clone(),
            built_at_ms: row.0,
            total_objects: row.1 as u64,
            size_bytes: row.2 as u64,
            is_complete: row.3,
            records,
        })
    }

    /// Metadata-only read; never deserializes the record payload.
    pub fn get_meta(&self, key: &BucketKey) -> Result<IndexStats, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT built_at_ms, total_objects, size_bytes, is_complete
             FROM bucket_indexes WHERE connection_id = ?1 AND bucket = ?2",
            params![key.connection_id, key.bucket],
            |r| {
                Ok(IndexStats {
                    built_at_ms: r.get(0)?,
                    total_objects: r.get::<_, i64>(1)? as u64,
                    size_bytes: r.get::<_, i64>(2)? as u64,
                    is_complete: r.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::IndexNotFound(key.clone()))
    }

    pub fn contains(&self, key: &BucketKey) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM bucket_indexes WHERE connection_id = ?1 AND bucket = ?2",
                params![key.connection_id, key.bucket],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns whether an entry existed.
    pub fn delete(&self, key: &BucketKey) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM bucket_indexes WHERE connection_id = ?1 AND bucket = ?2",
            params![key.connection_id, key.bucket],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectInfo;
    use tempfile::TempDir;

    fn sample_index(key: &BucketKey, built_at_ms: i64) -> BucketIndex {
        let records: Vec<IndexRecord> = (0..3)
            .map(|i| {
                IndexRecord::from_object(ObjectInfo {
                    key: format!("docs/File-{i}.txt"),
                    size: 100 + i,
                    last_modified_ms: 1_700_000_000_000 + i as i64,
                })
            })
            .collect();
        let size_bytes = rmp_serde::to_vec(&records).unwrap().len() as u64;
        BucketIndex {
            key: key.clone(),
            built_at_ms,
            total_objects: records.len() as u64,
            size_bytes,
            is_complete: true,
            records,
        }
    }

    #[test]
    fn put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(&dir.path().join("idx.db")).unwrap();
        let key = BucketKey::new("conn", "bucket");
        let index = sample_index(&key, 1000);
        store.put(&index).unwrap();

        let loaded = store.get(&key).unwrap();
        assert_eq!(loaded.built_at_ms, 1000);
        assert_eq!(loaded.total_objects, 3);
        assert_eq!(loaded.records, index.records);
        assert!(loaded.is_complete);
    }

    #[test]
    fn missing_key_is_index_not_found() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(&dir.path().join("idx.db")).unwrap();
        let key = BucketKey::new("conn", "nothing");
        assert!(matches!(
            store.get(&key),
            Err(StoreError::IndexNotFound(_))
        ));
        assert!(matches!(
            store.get_meta(&key),
            Err(StoreError::IndexNotFound(_))
        ));
        assert!(!store.contains(&key).unwrap());
    }

    #[test]
    fn put_replaces_wholesale() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(&dir.path().join("idx.db")).unwrap();
        let key = BucketKey::new("conn", "bucket");
        store.put(&sample_index(&key, 1000)).unwrap();

        let mut newer = sample_index(&key, 2000);
        newer.records.truncate(1);
        newer.total_objects = 1;
        store.put(&newer).unwrap();

        let loaded = store.get(&key).unwrap();
        assert_eq!(loaded.built_at_ms, 2000);
        assert_eq!(loaded.total_objects, 1);
        assert_eq!(loaded.records.len(), 1);
    }

    #[test]
    fn meta_matches_full_row() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(&dir.path().join("idx.db")).unwrap();
        let key = BucketKey::new("conn", "bucket");
        let index = sample_index(&key, 1000);
        store.put(&index).unwrap();

        let meta = store.get_meta(&key).unwrap();
        assert_eq!(meta.built_at_ms, index.built_at_ms);
        assert_eq!(meta.total_objects, index.total_objects);
        assert_eq!(meta.size_bytes, index.size_bytes);
        assert_eq!(meta.is_complete, index.is_complete);
    }

    #[test]
    fn delete_reports_existence() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(&dir.path().join("idx.db")).unwrap();
        let key = BucketKey::new("conn", "bucket");
        assert!(!store.delete(&key).unwrap());
        store.put(&sample_index(&key, 1000)).unwrap();
        assert!(store.delete(&key).unwrap());
        assert!(!store.contains(&key).unwrap());
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx.db");
        let key = BucketKey::new("conn", "bucket");
        {
            let store = IndexStore::open(&path).unwrap();
            store.put(&sample_index(&key, 1000)).unwrap();
        }
        let store = IndexStore::open(&path).unwrap();
        let loaded = store.get(&key).unwrap();
        assert_eq!(loaded.total_objects, 3);
    }

    #[test]
    fn rejects_newer_schema_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }
        assert!(matches!(
            IndexStore::open(&path),
            Err(StoreError::SchemaVersion { .. })
        ));
    }
}
