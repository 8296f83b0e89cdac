// src/state/schema.rs

//! Install state schema and migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Install state schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    // Each version commits on its own, so a failure leaves the last good one
    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying install state migration to version {}", version);
        let tx = conn.unchecked_transaction()?;
        apply_migration(&tx, version)?;
        set_schema_version(&tx, version)?;
        tx.commit()?;
    }
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        // Versions above SCHEMA_VERSION are never requested
        _ => Ok(()),
    }
}

/// Version 1: one row per concrete spec hash
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE installs (
            hash TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            prefix TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('installed', 'failed', 'in_progress')),
            updated_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Version 2: failure reasons and lookup by package name
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "ALTER TABLE installs ADD COLUMN error TEXT;
         CREATE INDEX idx_installs_name ON installs(name);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_schema_version_tracking() {
        let (_temp, conn) = create_test_db();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_failed_migration_is_rolled_back() {
        let (_temp, conn) = create_test_db();
        // Occupies the index name that version 2 creates
        conn.execute_batch(
            "CREATE TABLE other (x TEXT);
             CREATE INDEX idx_installs_name ON other(x);",
        )
        .unwrap();

        assert!(migrate(&conn).is_err());
        assert_eq!(get_schema_version(&conn).unwrap(), 1);

        let columns: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('installs')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(columns.contains(&"status".to_string()));
        assert!(!columns.contains(&"error".to_string()));
    }

    #[test]
    fn test_status_constraint() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO installs (hash, name, version, prefix, status, updated_at)
             VALUES ('h', 'zlib', '1.3', '/p', 'bogus', 'now')",
            [],
        );
        assert!(bad.is_err());
    }
}
