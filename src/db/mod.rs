//! SQLite-backed store for conversations, sender rules and triage corrections.
//!
//! The database lives at `~/.triage/triage.db` unless configured otherwise.
//! One `TriageDb` owns one connection; callers share it as [`SharedDb`] and
//! never hold the lock across an `.await`.
//!
//! Row writes that can race (pipeline vs. reviewer) go through a `version`
//! compare-and-set; rule writes are keyed by the `(workspace_id, pattern)`
//! uniqueness constraint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

mod conversations;
mod corrections;
mod rules;
pub mod types;

pub use types::*;

/// Connection shared between the pipeline, batch workers and review calls.
pub type SharedDb = Arc<Mutex<TriageDb>>;

/// Timestamp format used for every stored instant.
///
/// Fixed-width UTC so that string comparison is chronological.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct TriageDb {
    conn: Connection,
}

impl TriageDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Wrap this connection for sharing across tasks.
    pub fn into_shared(self) -> SharedDb {
        Arc::new(Mutex::new(self))
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| E::from(DbError::Sqlite(e)))?;
        match f(self) {
            Ok(val) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|e| E::from(DbError::Sqlite(e)))?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.triage/triage.db` and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        crate::migrations::run_migrations(&conn)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        log::debug!("Opened triage database at {}", path.display());
        Ok(Self { conn })
    }

    /// Open the configured path, or the default location when none is set.
    pub fn open_configured(path: Option<&Path>) -> Result<Self, DbError> {
        match path {
            Some(p) => Self::open_at(p.to_path_buf()),
            None => Self::open(),
        }
    }

    /// Resolve the default database path: `~/.triage/triage.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".triage").join("triage.db"))
    }
}
