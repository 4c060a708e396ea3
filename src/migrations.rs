//! Schema versioning for the triage database.
//!
//! SQL files under `migrations/` are compiled in and applied in order. Each
//! one commits together with its `schema_version` row, so a crash mid-upgrade
//! leaves the database at the last complete version.

use rusqlite::{params, Connection};

use crate::db::DbError;

/// `(version, sql)` pairs in ascending order.
const MIGRATIONS: &[(i32, &str)] = &[(1, include_str!("migrations/001_baseline.sql"))];

fn latest_version() -> i32 {
    MIGRATIONS.last().map_or(0, |(v, _)| *v)
}

fn applied_version(conn: &Connection) -> Result<i32, DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Hot copy to `<db>.v<from>.bak` before upgrading an existing file.
fn snapshot_before_upgrade(conn: &Connection, from: i32) -> Result<(), DbError> {
    let path: String = conn.query_row("PRAGMA database_list", [], |row| row.get(2))?;
    if from == 0 || path.is_empty() {
        return Ok(());
    }

    let target = format!("{}.v{}.bak", path, from);
    let mut dest = Connection::open(&target)?;
    rusqlite::backup::Backup::new(conn, &mut dest)?.step(-1)?;
    log::info!("Saved schema v{} snapshot to {}", from, target);
    Ok(())
}

/// Bring the schema up to date. Returns how many migrations ran.
///
/// A database stamped with a version this build does not know is refused
/// rather than opened.
pub fn run_migrations(conn: &Connection) -> Result<usize, DbError> {
    let from = applied_version(conn)?;
    let latest = latest_version();
    if from > latest {
        return Err(DbError::Migration(format!(
            "database is at schema v{} but this build only knows v{}",
            from, latest
        )));
    }
    if from == latest {
        return Ok(0);
    }

    snapshot_before_upgrade(conn, from)?;

    let mut applied = 0;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > from) {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let step = conn
            .execute_batch(sql)
            .and_then(|_| {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![version],
                )
            });
        if let Err(e) = step {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(DbError::Migration(format!("v{}: {}", version, e)));
        }
        conn.execute_batch("COMMIT")?;
        log::info!("Schema migrated to v{}", version);
        applied += 1;
    }
    Ok(applied)
}
