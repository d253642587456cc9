/// Singleton run lock: an exclusive, non-blocking advisory lock on a marker file.
///
/// The lock is tied to the open file, so the OS drops it when the process
/// exits for any reason.
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Result of trying to take the run lock.
#[derive(Debug)]
pub enum LockAttempt {
    /// This process now holds the lock.
    Acquired(RunLock),
    /// Another live process holds the lock.
    Contended,
    /// The lock file could not be opened or locked for some other reason.
    Unavailable(std::io::Error),
}

/// A held run lock. Released on [`RunLock::release`] or drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Path of the lock file.
    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Explicitly release the lock.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(error = %e, path = %self.path.display(), "failed to unlock run lock");
        }
    }
}

/// Try to take the lock at `path` without blocking.
pub fn try_acquire(path: &Path) -> LockAttempt {
    let file = match OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
    {
        Ok(f) => f,
        Err(e) => return LockAttempt::Unavailable(e),
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "acquired run lock");
            LockAttempt::Acquired(RunLock {
                file,
                path: path.to_path_buf(),
            })
        }
        Err(e) if is_contended(&e) => LockAttempt::Contended,
        Err(e) => LockAttempt::Unavailable(e),
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
