//! Small pool of SQLite connections sharing one database file.
//!
//! Connections are opened lazily and returned to an idle list after use.
//! Every connection is configured identically: WAL journal, foreign keys
//! enforced, and a driver-level busy timeout.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use super::store::{StoreError, StoreResult};

pub(crate) struct ConnectionPool {
    path: PathBuf,
    busy_timeout: Duration,
    max_idle: usize,
    idle: Mutex<Vec<Connection>>,
}

impl ConnectionPool {
    pub(crate) fn new(path: impl Into<PathBuf>, busy_timeout: Duration, max_idle: usize) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
            max_idle: max_idle.max(1),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Run `f` on a pooled connection, opening a new one if none is idle.
    ///
    /// The connection goes back to the idle list afterwards unless `f` left
    /// it inside a transaction.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let reused = self
            .idle
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .pop();
        let mut conn = match reused {
            Some(conn) => conn,
            None => self.open()?,
        };
        let result = f(&mut conn);
        if conn.is_autocommit() {
            self.put_back(conn);
        }
        result
    }

    fn open(&self) -> StoreResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)?;
        conn.busy_timeout(self.busy_timeout)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
        debug!(path = %self.path.display(), journal_mode = %mode, "Opened SQLite connection");
        Ok(conn)
    }

    fn put_back(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn idle_count(pool: &ConnectionPool) -> usize {
        pool.idle.lock().unwrap().len()
    }

    #[test]
    fn test_connection_is_reused() {
        let dir = tempdir().unwrap();
        let pool = ConnectionPool::new(dir.path().join("pool.db"), Duration::from_millis(50), 2);

        let mode: String = pool
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode, "wal");
        assert_eq!(idle_count(&pool), 1);

        pool.with_conn(|_| Ok(())).unwrap();
        assert_eq!(idle_count(&pool), 1);
    }

    #[test]
    fn test_open_transaction_is_not_returned() {
        let dir = tempdir().unwrap();
        let pool = ConnectionPool::new(dir.path().join("pool.db"), Duration::from_millis(50), 2);

        pool.with_conn(|conn| Ok(conn.execute_batch("BEGIN")?)).unwrap();
        assert_eq!(idle_count(&pool), 0);
    }
}
