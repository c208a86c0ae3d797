//! Narrow surface over the embedded SQLite engine.
//!
//! The replicator only ever needs four things from SQLite: open a handle,
//! checkpoint the WAL into the primary file, read the primary file's bytes,
//! and close. Everything else (schema, queries, transactions) belongs to the
//! applications that own the databases.

use std::io::Read;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::error::FleetError;
use crate::pool::BufferPool;

/// Path of the WAL companion for a primary file.
#[must_use]
pub fn wal_path(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_os_string();
    s.push("-wal");
    PathBuf::from(s)
}

/// Size of the WAL companion, or 0 when it does not exist.
#[must_use]
pub fn wal_size(db_path: &Path) -> u64 {
    std::fs::metadata(wal_path(db_path)).map(|m| m.len()).unwrap_or(0)
}

/// Open a read-only handle suitable for pooling.
pub fn open_read_only(path: &Path) -> Result<Connection, FleetError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Flush WAL frames into the primary file with `TRUNCATE` semantics.
pub fn checkpoint_truncate(path: &Path) -> Result<(), FleetError> {
    let conn = Connection::open(path)?;
    // The pragma returns a result row (busy, log, checkpointed).
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
    debug!(path = %path.display(), "checkpointed WAL");
    Ok(())
}

/// Read a consistent snapshot of the primary file.
///
/// If a non-empty WAL companion exists, a TRUNCATE checkpoint is attempted
/// first so the primary file carries all committed frames. Checkpoint
/// failures are logged and swallowed: the read proceeds regardless, and the
/// next cycle retries. The read goes through pooled scratch buffers so
/// thousands of concurrent snapshots reuse the same 8 KiB chunks.
pub fn read_db_bytes(path: &Path, buffers: &BufferPool) -> Result<Vec<u8>, FleetError> {
    if wal_size(path) > 0 {
        if let Err(e) = checkpoint_truncate(path) {
            warn!(path = %path.display(), error = %e, "checkpoint failed, reading primary file as-is");
        }
    }

    let mut file = std::fs::File::open(path)?;
    let mut data = Vec::with_capacity(file.metadata().map(|m| m.len() as usize).unwrap_or(0));
    let mut buf = buffers.get();
    loop {
        let n = match file.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                buffers.put(buf);
                return Err(e.into());
            }
        };
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    buffers.put(buf);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);
             INSERT INTO t (v) VALUES ('one'), ('two');",
        )
        .unwrap();
    }

    #[test]
    fn test_wal_path() {
        assert_eq!(
            wal_path(Path::new("/data/x.db")),
            PathBuf::from("/data/x.db-wal")
        );
    }

    #[test]
    fn test_wal_size_missing_is_zero() {
        assert_eq!(wal_size(Path::new("/nonexistent/y.db")), 0);
    }

    #[test]
    fn test_read_db_bytes_checkpoints_wal() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("t.db");
        create_db(&db);

        let buffers = BufferPool::new();
        let bytes = read_db_bytes(&db, &buffers).unwrap();
        assert!(bytes.starts_with(b"SQLite format 3\0"));
        // TRUNCATE checkpoint leaves an empty WAL behind.
        assert_eq!(wal_size(&db), 0);
        // The scratch buffer went back to the free list.
        assert_eq!(buffers.available(), 1);
    }

    #[test]
    fn test_read_matches_direct_read() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("t.db");
        create_db(&db);
        // Checkpoint first so the direct read sees the same bytes.
        checkpoint_truncate(&db).unwrap();

        let buffers = BufferPool::new();
        assert_eq!(
            read_db_bytes(&db, &buffers).unwrap(),
            std::fs::read(&db).unwrap()
        );
    }

    #[test]
    fn test_open_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("ro.db");
        create_db(&db);

        let conn = open_read_only(&db).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
        assert!(conn.execute("INSERT INTO t (v) VALUES ('three')", []).is_err());
    }

    #[test]
    fn test_read_missing_db_is_not_found() {
        let buffers = BufferPool::new();
        let err = read_db_bytes(Path::new("/nonexistent/z.db"), &buffers).unwrap_err();
        assert!(err.is_not_found());
    }
}
