use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use fs2::FileExt;

use crate::{
    console::Console,
    error::{Result, VaultError},
    fs_secure::ensure_private_dir,
};

/// Exclusive advisory lock held across one `up` or `down` sequence.
///
/// Released when dropped.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Blocks until the lock at `path` is held by this process.
    pub fn acquire<C: Console + ?Sized>(path: &Path, console: &C) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_private_dir(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(error) if is_contended(&error) => {
                console.progress("Another session holds this workspace; waiting...");
                file.lock_exclusive()
                    .map_err(|_| VaultError::LockUnavailable(path.to_path_buf()))?;
            }
            Err(_) => return Err(VaultError::LockUnavailable(path.to_path_buf())),
        }
        tracing::debug!(path = %path.display(), "workspace lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(error) = FileExt::unlock(&self.file) {
            tracing::warn!(%error, path = %self.path.display(), "releasing workspace lock failed");
        }
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
