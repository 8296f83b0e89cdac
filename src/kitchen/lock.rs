// src/kitchen/lock.rs

//! Install root lock
//!
//! Only one kitchen may write into an install root at a time. The lock is a
//! `flock(LOCK_EX)` on `<install_root>/.cookbook.lock`, held for the whole
//! run and released on drop.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOCK_FILE: &str = ".cookbook.lock";

/// Exclusive lock on an install root
#[derive(Debug)]
pub struct InstallLock {
    /// Kept open to hold the lock
    _file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Lock `install_root`, failing if another run holds it
    pub fn try_acquire(install_root: &Path) -> Result<Self> {
        fs::create_dir_all(install_root)?;
        let path = install_root.join(LOCK_FILE);
        let file = File::create(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired install lock at {}", path.display());
                Ok(Self { _file: file, path })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(Error::IoError(format!(
                "install root {} is locked by another run",
                install_root.display()
            ))),
            Err(e) => Err(Error::IoError(format!(
                "failed to lock {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_fails_until_release() {
        let dir = TempDir::new().unwrap();
        let lock = InstallLock::try_acquire(dir.path()).unwrap();
        assert!(lock.path().ends_with(LOCK_FILE));

        let err = InstallLock::try_acquire(dir.path()).unwrap_err();
        assert!(err.to_string().contains("locked by another run"));

        drop(lock);
        assert!(InstallLock::try_acquire(dir.path()).is_ok());
    }
}
