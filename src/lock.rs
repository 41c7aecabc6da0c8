//! Cross-process ownership of due-post publishing.
//!
//! Per-post locks only serialize work inside one process. Any process that
//! rehydrates or mutates posts first takes an exclusive `fs2` lock on a file
//! next to the database, so two processes never publish the same row.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Held for as long as this process may publish. Dropping it releases the lock.
#[derive(Debug)]
pub struct SchedulerLock {
    file: File,
    path: PathBuf,
}

impl SchedulerLock {
    /// Lock file for the database at `db_path`.
    pub fn path_for(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn open(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
    }

    /// Take the lock if nobody else holds it. `Ok(None)` means another
    /// process owns publishing right now.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let file = Self::open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!("Acquired scheduler lock {}", path.display());
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Wait until the lock is free, then take it.
    pub async fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(lock) = Self::try_acquire(path)? {
            return Ok(lock);
        }

        tracing::info!("Waiting for another postflow process to release {}", path.display());
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> io::Result<Self> {
            let file = Self::open(&path)?;
            file.lock_exclusive()?;
            Ok(Self { file, path })
        })
        .await
        .map_err(io::Error::other)?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SchedulerLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release scheduler lock {}: {}", self.path.display(), e);
        }
    }
}
