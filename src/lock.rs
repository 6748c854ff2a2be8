//! Advisory lock serialising read-modify-write of the overlay config.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// RAII guard: the exclusive lock is released when the guard is dropped.
///
/// Mutating registry operations take `&ConfigLock`, so they cannot run
/// without it.
#[derive(Debug)]
pub struct ConfigLock {
    file: File,
    path: PathBuf,
}

impl ConfigLock {
    /// Lock file guarding `config_path` (`<config>.lock`).
    pub fn path_for(config_path: &Path) -> PathBuf {
        let mut name = config_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        config_path.with_file_name(name)
    }

    /// Acquire the lock, waiting for another holder to finish if needed.
    pub fn acquire(config_path: &Path) -> Result<Self> {
        let lock_path = Self::path_for(config_path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Never unlink the lock file: a second process could create a new
        // file at the same path and hold a separate lock on it.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("opening lock file '{}'", lock_path.display()))?;

        if file.try_lock_exclusive().is_err() {
            log::info!(
                "waiting for another overlayctl holding {}",
                lock_path.display()
            );
            file.lock_exclusive()
                .with_context(|| format!("locking '{}'", lock_path.display()))?;
        }
        log::debug!("acquired {}", lock_path.display());

        Ok(Self {
            file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConfigLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
