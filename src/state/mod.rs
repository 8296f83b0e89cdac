// src/state/mod.rs

//! Persisted install state
//!
//! A SQLite database maps concrete spec hashes to install records. Every
//! status change runs in its own transaction behind a single mutex-guarded
//! connection, so the executor's workers can share one `InstallState`.

mod schema;

pub use schema::SCHEMA_VERSION;

use crate::error::{Error, Result};
use crate::spec::ConcreteSpec;
use crate::version::Version;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Lifecycle of an install record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Installed,
    Failed,
    InProgress,
}

impl InstallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStatus::Installed => "installed",
            InstallStatus::Failed => "failed",
            InstallStatus::InProgress => "in_progress",
        }
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InstallStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "installed" => Ok(InstallStatus::Installed),
            "failed" => Ok(InstallStatus::Failed),
            "in_progress" => Ok(InstallStatus::InProgress),
            other => Err(Error::ParseError(format!("unknown install status '{}'", other))),
        }
    }
}

/// One row of the install state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallRecord {
    pub hash: String,
    pub name: String,
    pub version: String,
    pub prefix: PathBuf,
    pub status: InstallStatus,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl InstallRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        let updated_at: String = row.get("updated_at")?;
        let prefix: String = row.get("prefix")?;
        Ok(Self {
            hash: row.get("hash")?,
            name: row.get("name")?,
            version: row.get("version")?,
            prefix: PathBuf::from(prefix),
            status: status.parse().unwrap_or(InstallStatus::Failed),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_default(),
            error: row.get("error")?,
        })
    }
}

/// Thread-safe handle on the install state database
pub struct InstallState {
    conn: Mutex<Connection>,
}

impl InstallState {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        debug!("Opened install state at {}", path.display());
        Self::from_connection(conn)
    }

    /// Non-persistent state, for dry runs and tests
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record for a hash, whatever its status
    pub fn lookup(&self, hash: &str) -> Result<Option<InstallRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT * FROM installs WHERE hash = ?1",
                [hash],
                InstallRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Prefix of a successfully installed hash
    pub fn installed_prefix(&self, hash: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .lookup(hash)?
            .filter(|r| r.status == InstallStatus::Installed)
            .map(|r| r.prefix))
    }

    /// Distinct installed versions of a package, highest first
    pub fn installed_versions(&self, name: &str) -> Result<Vec<Version>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT version FROM installs WHERE name = ?1 AND status = 'installed'",
        )?;
        let raw = stmt
            .query_map([name], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut versions: Vec<Version> = raw
            .iter()
            .filter_map(|v| match Version::parse(v) {
                Ok(version) => Some(version),
                Err(e) => {
                    warn!("Ignoring install record {}@{}: {}", name, v, e);
                    None
                }
            })
            .collect();
        versions.sort_by(|a, b| b.cmp(a));
        versions.dedup();
        Ok(versions)
    }

    /// All records, ordered by name and version
    pub fn list(&self) -> Result<Vec<InstallRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM installs ORDER BY name, version, hash")?;
        let records = stmt
            .query_map([], InstallRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Mark a build as started
    pub fn mark_in_progress(&self, spec: &ConcreteSpec, prefix: &Path) -> Result<()> {
        self.upsert(
            &spec.hash,
            &spec.name,
            spec.version.as_str(),
            prefix,
            InstallStatus::InProgress,
            None,
        )
    }

    /// Mark a build as finished and installed at `prefix`
    pub fn mark_installed(&self, spec: &ConcreteSpec, prefix: &Path) -> Result<()> {
        self.upsert(
            &spec.hash,
            &spec.name,
            spec.version.as_str(),
            prefix,
            InstallStatus::Installed,
            None,
        )
    }

    /// Mark a build as failed
    pub fn mark_failed(&self, spec: &ConcreteSpec, prefix: &Path, error: &str) -> Result<()> {
        self.upsert(
            &spec.hash,
            &spec.name,
            spec.version.as_str(),
            prefix,
            InstallStatus::Failed,
            Some(error),
        )
    }

    fn upsert(
        &self,
        hash: &str,
        name: &str,
        version: &str,
        prefix: &Path,
        status: InstallStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO installs (hash, name, version, prefix, status, updated_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(hash) DO UPDATE SET
                prefix = excluded.prefix,
                status = excluded.status,
                updated_at = excluded.updated_at,
                error = excluded.error",
            params![
                hash,
                name,
                version,
                prefix.to_string_lossy().into_owned(),
                status.as_str(),
                Utc::now().to_rfc3339(),
                error,
            ],
        )?;
        tx.commit()?;
        debug!("{}@{} /{} -> {}", name, version, crate::hash::short(hash), status);
        Ok(())
    }

    /// Roll back builds left `in_progress` by an interrupted run
    ///
    /// Their prefixes are removed and the records marked failed.
    pub fn recover_interrupted(&self) -> Result<Vec<InstallRecord>> {
        let stale: Vec<InstallRecord> = {
            let conn = self.conn();
            let mut stmt = conn.prepare("SELECT * FROM installs WHERE status = 'in_progress'")?;
            let rows = stmt
                .query_map([], InstallRecord::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        for record in &stale {
            warn!(
                "Rolling back interrupted build of {}@{} at {}",
                record.name,
                record.version,
                record.prefix.display()
            );
            if record.prefix.exists() {
                fs::remove_dir_all(&record.prefix)?;
            }
            self.upsert(
                &record.hash,
                &record.name,
                &record.version,
                &record.prefix,
                InstallStatus::Failed,
                Some("interrupted"),
            )?;
        }
        if !stale.is_empty() {
            info!("Recovered {} interrupted builds", stale.len());
        }
        Ok(stale)
    }

    /// Forget a record entirely
    pub fn remove(&self, hash: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM installs WHERE hash = ?1", [hash])?;
        tx.commit()?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::BuildSystemKind;
    use crate::spec::Compiler;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn spec(name: &str, version: &str, hash: &str) -> ConcreteSpec {
        ConcreteSpec {
            name: name.to_string(),
            version: Version::parse(version).unwrap(),
            variants: BTreeMap::new(),
            platform: "linux-x86_64".to_string(),
            compiler: Compiler::parse("gcc@11.4.0").unwrap(),
            dependencies: BTreeMap::new(),
            build_system: BuildSystemKind::Autotools,
            parallel: true,
            hash: hash.to_string(),
        }
    }

    #[test]
    fn test_status_lifecycle() {
        let state = InstallState::open_in_memory().unwrap();
        let zlib = spec("zlib", "1.3", "aaaa");
        let prefix = PathBuf::from("/opt/zlib");

        assert!(state.lookup("aaaa").unwrap().is_none());

        state.mark_in_progress(&zlib, &prefix).unwrap();
        assert_eq!(
            state.lookup("aaaa").unwrap().unwrap().status,
            InstallStatus::InProgress
        );
        assert!(state.installed_prefix("aaaa").unwrap().is_none());

        state.mark_installed(&zlib, &prefix).unwrap();
        assert_eq!(state.installed_prefix("aaaa").unwrap(), Some(prefix.clone()));

        state.mark_failed(&zlib, &prefix, "boom").unwrap();
        let record = state.lookup("aaaa").unwrap().unwrap();
        assert_eq!(record.status, InstallStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_installed_versions_highest_first() {
        let state = InstallState::open_in_memory().unwrap();
        let prefix = PathBuf::from("/opt/x");
        state.mark_installed(&spec("mumps", "5.1.1", "h1"), &prefix).unwrap();
        state.mark_installed(&spec("mumps", "5.2.0", "h2"), &prefix).unwrap();
        state.mark_installed(&spec("mumps", "5.1.1", "h3"), &prefix).unwrap();
        state.mark_failed(&spec("mumps", "5.3.0", "h4"), &prefix, "x").unwrap();

        let versions: Vec<String> = state
            .installed_versions("mumps")
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(versions, vec!["5.2.0", "5.1.1"]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("installs.db");
        {
            let state = InstallState::open(&path).unwrap();
            state
                .mark_installed(&spec("zlib", "1.3", "abc"), Path::new("/opt/zlib"))
                .unwrap();
        }
        let state = InstallState::open(&path).unwrap();
        assert_eq!(state.list().unwrap().len(), 1);
        assert!(state.installed_prefix("abc").unwrap().is_some());
    }

    #[test]
    fn test_recover_interrupted_removes_prefix() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("zlib-1.3-abc");
        fs::create_dir_all(prefix.join("lib")).unwrap();

        let state = InstallState::open_in_memory().unwrap();
        state.mark_in_progress(&spec("zlib", "1.3", "abc"), &prefix).unwrap();

        let recovered = state.recover_interrupted().unwrap();
        assert_eq!(recovered.len(), 1);
        assert!(!prefix.exists());
        let record = state.lookup("abc").unwrap().unwrap();
        assert_eq!(record.status, InstallStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("interrupted"));
        assert!(state.recover_interrupted().unwrap().is_empty());
    }

    #[test]
    fn test_remove() {
        let state = InstallState::open_in_memory().unwrap();
        state
            .mark_installed(&spec("zlib", "1.3", "abc"), Path::new("/opt/zlib"))
            .unwrap();
        assert!(state.remove("abc").unwrap());
        assert!(!state.remove("abc").unwrap());
    }
}
