//! Thread-safe store handle.

use crate::{
    migrations, queries, Clock, QueueStats, QueuedMessage, StoreError, StoreResult, SystemClock,
};
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Durable, ordered message store.
///
/// Every operation takes the connection lock for its own duration only, so
/// writes are serialized and no caller ever observes a partial record. The
/// guard is released on every exit path, including errors.
pub struct Database {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a store at the given path using wall-clock time.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open a store at the given path, running migrations if needed.
    pub fn open_with_clock(path: &Path, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        migrations::run_migrations(&conn)?;

        info!(path = %path.display(), "Message store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory store for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    /// Open an in-memory store driven by the given clock.
    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            path: None,
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Durably persist a new pending message and return its id.
    ///
    /// The enqueue time is truncated to whole microseconds, the precision of
    /// the `timestamp` column, so the record reads back exactly as written.
    pub fn append(&self, topic: &str, payload: &[u8]) -> StoreResult<i64> {
        let enqueued_at = self.clock.now().trunc_subsecs(6);
        let id = self.with_conn(|conn| queries::insert_message(conn, topic, payload, enqueued_at))?;
        debug!(id, topic = %topic, bytes = payload.len(), "Appended message");
        Ok(id)
    }

    /// Pending messages, ascending id, as one consistent snapshot.
    pub fn list_pending(&self) -> StoreResult<Vec<QueuedMessage>> {
        self.with_conn(queries::list_pending_messages)
    }

    /// Lowest-id pending message.
    pub fn next_pending(&self) -> StoreResult<Option<QueuedMessage>> {
        self.with_conn(queries::next_pending_message)
    }

    /// Mark a message delivered.
    ///
    /// No-op when already delivered. Fails with [`StoreError::NotFound`] when
    /// the record was purged in the meantime.
    pub fn mark_delivered(&self, id: i64) -> StoreResult<()> {
        self.with_conn(|conn| queries::mark_message_delivered(conn, id))
    }

    /// Delete every message enqueued before `cutoff`, delivered or not.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.with_conn(|conn| queries::delete_messages_older_than(conn, cutoff))
    }

    /// Full diagnostic scan, ascending id.
    pub fn all_messages(&self) -> StoreResult<Vec<QueuedMessage>> {
        self.with_conn(queries::list_all_messages)
    }

    /// Look up a single message.
    pub fn get(&self, id: i64) -> StoreResult<Option<QueuedMessage>> {
        self.with_conn(|conn| queries::get_message(conn, id))
    }

    pub fn stats(&self) -> StoreResult<QueueStats> {
        self.with_conn(queries::queue_stats)
    }

    /// Close the underlying connection, flushing the WAL.
    pub fn close(self) -> StoreResult<()> {
        let conn = self.conn.into_inner();
        conn.close()
            .map_err(|(_, e)| StoreError::Connection(format!("failed to close store: {e}")))?;
        if let Some(path) = &self.path {
            info!(path = %path.display(), "Message store closed");
        }
        Ok(())
    }
}
