//! Durable cache storage backed by SQLite.
//!
//! Each North connector owns one value database and one file database under
//! its cache folder; no two connectors ever share a database file, so there
//! is no cross-connector contention. A third, shared database tracks raw
//! files already ingested by polling South connectors (filename → last
//! modified time) to avoid re-ingesting unchanged files.
//!
//! Statements are short and run on a connection behind a mutex; WAL mode
//! keeps readers and the single writer out of each other's way.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection};

use crate::core::data::{DataPayload, DataValue};
use crate::core::error::Result;

/// A value entry read back from durable storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    /// Storage row id, used to purge the entry after delivery.
    pub id: i64,

    /// The measurement.
    pub value: DataValue,
}

/// A file entry read back from durable storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFile {
    /// Storage row id.
    pub id: i64,

    /// Receipt timestamp.
    pub timestamp: DateTime<Utc>,

    /// Originating South connector id.
    pub south_id: String,

    /// Current path of the cached copy.
    pub path: PathBuf,
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

fn lock_conn(conn: &Mutex<Connection>) -> std::sync::MutexGuard<'_, Connection> {
    // A poisoned mutex only means a panic elsewhere; the connection is
    // still usable.
    conn.lock().unwrap_or_else(|e| e.into_inner())
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Append-only durable queue of value entries for one North connector.
pub struct ValueDatabase {
    conn: Mutex<Connection>,
}

impl ValueDatabase {
    /// Open (creating if needed) the value database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_connection(path.as_ref())?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                id INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                point_id TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_timestamp ON cache (timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a batch of values in one transaction.
    pub fn append(&self, values: &[DataValue]) -> Result<()> {
        let mut conn = lock_conn(&self.conn);
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO cache (timestamp, point_id, data) VALUES (?1, ?2, ?3)",
            )?;
            for value in values {
                let data = serde_json::to_string(&value.data)?;
                stmt.execute(params![
                    value.timestamp.timestamp_millis(),
                    value.point_id,
                    data
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Read up to `limit` entries, oldest timestamp first.
    pub fn read_oldest(&self, limit: usize) -> Result<Vec<CachedValue>> {
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare_cached(
            "SELECT id, timestamp, point_id, data FROM cache
             ORDER BY timestamp, id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, ts, point_id, data) = row?;
            let data: DataPayload = serde_json::from_str(&data)?;
            entries.push(CachedValue {
                id,
                value: DataValue {
                    point_id,
                    timestamp: millis_to_utc(ts),
                    data,
                },
            });
        }
        Ok(entries)
    }

    /// Delete exactly the given entries.
    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = lock_conn(&self.conn);
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM cache WHERE id IN ({})", placeholders);
        conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }

    /// Number of entries currently queued.
    pub fn count(&self) -> Result<usize> {
        let conn = lock_conn(&self.conn);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Append-only durable queue of file entries for one North connector.
pub struct FileDatabase {
    conn: Mutex<Connection>,
}

impl FileDatabase {
    /// Open (creating if needed) the file database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_connection(path.as_ref())?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                id INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                south_id TEXT NOT NULL,
                path TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one file entry.
    pub fn append(&self, timestamp: DateTime<Utc>, south_id: &str, path: &Path) -> Result<()> {
        let conn = lock_conn(&self.conn);
        conn.execute(
            "INSERT INTO cache (timestamp, south_id, path) VALUES (?1, ?2, ?3)",
            params![
                timestamp.timestamp_millis(),
                south_id,
                path.to_string_lossy()
            ],
        )?;
        Ok(())
    }

    /// Read up to `limit` entries, oldest first.
    pub fn read_oldest(&self, limit: usize) -> Result<Vec<CachedFile>> {
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare_cached(
            "SELECT id, timestamp, south_id, path FROM cache
             ORDER BY timestamp, id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(CachedFile {
                id: row.get(0)?,
                timestamp: millis_to_utc(row.get(1)?),
                south_id: row.get(2)?,
                path: PathBuf::from(row.get::<_, String>(3)?),
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Delete exactly the given entries.
    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = lock_conn(&self.conn);
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM cache WHERE id IN ({})", placeholders);
        conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }

    /// Number of entries currently queued.
    pub fn count(&self) -> Result<usize> {
        let conn = lock_conn(&self.conn);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Dedup table for polling-based file Souths: filename → last modified time.
pub struct RawFileDatabase {
    conn: Mutex<Connection>,
}

impl RawFileDatabase {
    /// Open (creating if needed) the raw-file database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_connection(path.as_ref())?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                id INTEGER PRIMARY KEY,
                filename TEXT UNIQUE NOT NULL,
                modified INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Record that `filename` with modification time `modified` was ingested.
    pub fn upsert(&self, filename: &str, modified: i64) -> Result<()> {
        let conn = lock_conn(&self.conn);
        conn.execute(
            "INSERT INTO cache (filename, modified) VALUES (?1, ?2)
             ON CONFLICT(filename) DO UPDATE SET modified = ?2",
            params![filename, modified],
        )?;
        Ok(())
    }

    /// Last recorded modification time for `filename`, if any.
    pub fn modified_time(&self, filename: &str) -> Result<Option<i64>> {
        let conn = lock_conn(&self.conn);
        let mut stmt = conn.prepare_cached("SELECT modified FROM cache WHERE filename = ?1")?;
        let mut rows = stmt.query(params![filename])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::core::data::Value;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().unwrap()
    }

    #[test]
    fn test_value_queue_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let db = ValueDatabase::open(dir.path().join("values.db")).unwrap();

        // Enqueue out of chronological order
        db.append(&[
            DataValue::new("p2", 2i64).with_timestamp(ts(200)),
            DataValue::new("p1", 1i64).with_timestamp(ts(100)),
            DataValue::new("p3", 3i64).with_timestamp(ts(300)),
        ])
        .unwrap();

        assert_eq!(db.count().unwrap(), 3);

        let batch = db.read_oldest(2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].value.point_id, "p1");
        assert_eq!(batch[1].value.point_id, "p2");
    }

    #[test]
    fn test_value_queue_delete_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let db = ValueDatabase::open(dir.path().join("values.db")).unwrap();

        db.append(&[
            DataValue::new("p1", 1i64).with_timestamp(ts(1)),
            DataValue::new("p2", 2i64).with_timestamp(ts(2)),
        ])
        .unwrap();

        let batch = db.read_oldest(1).unwrap();
        db.delete_by_ids(&[batch[0].id]).unwrap();

        assert_eq!(db.count().unwrap(), 1);
        let remaining = db.read_oldest(10).unwrap();
        assert_eq!(remaining[0].value.point_id, "p2");
    }

    #[test]
    fn test_value_payload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = ValueDatabase::open(dir.path().join("values.db")).unwrap();

        let original = DataValue::new("p1", 42.5).with_timestamp(ts(1000));
        db.append(std::slice::from_ref(&original)).unwrap();

        let batch = db.read_oldest(1).unwrap();
        assert_eq!(batch[0].value, original);
    }

    #[test]
    fn test_large_integers_survive_storage_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let db = ValueDatabase::open(dir.path().join("values.db")).unwrap();

        // Beyond f64's exact-integer range; a float detour would round it.
        let original = DataValue::new("counter", 9_007_199_254_740_993i64).with_timestamp(ts(1));
        db.append(std::slice::from_ref(&original)).unwrap();

        let batch = db.read_oldest(1).unwrap();
        assert_eq!(batch[0].value.data.value, Value::Integer(9_007_199_254_740_993));
        assert_eq!(batch[0].value, original);
    }

    #[test]
    fn test_file_queue() {
        let dir = tempfile::tempdir().unwrap();
        let db = FileDatabase::open(dir.path().join("files.db")).unwrap();

        db.append(ts(2), "s1", Path::new("/tmp/b.csv")).unwrap();
        db.append(ts(1), "s1", Path::new("/tmp/a.csv")).unwrap();

        let oldest = db.read_oldest(1).unwrap();
        assert_eq!(oldest[0].path, PathBuf::from("/tmp/a.csv"));

        db.delete_by_ids(&[oldest[0].id]).unwrap();
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_raw_file_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let db = RawFileDatabase::open(dir.path().join("raw.db")).unwrap();

        assert_eq!(db.modified_time("a.csv").unwrap(), None);

        db.upsert("a.csv", 100).unwrap();
        assert_eq!(db.modified_time("a.csv").unwrap(), Some(100));

        // Upsert replaces the modification time
        db.upsert("a.csv", 200).unwrap();
        assert_eq!(db.modified_time("a.csv").unwrap(), Some(200));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.db");

        {
            let db = ValueDatabase::open(&path).unwrap();
            db.append(&[DataValue::new("p1", 1i64).with_timestamp(ts(1))])
                .unwrap();
        }

        let db = ValueDatabase::open(&path).unwrap();
        assert_eq!(db.count().unwrap(), 1);
    }
}
