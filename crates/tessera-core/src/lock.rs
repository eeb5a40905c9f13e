use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

/// Default bound on how long a save waits for a competing writer.
pub const DEFAULT_SAVE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Advisory lock errors for project files.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{}: lock timed out after {waited:?} at {}", ErrorCode::LockContention.code(), path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("{}: {0}", ErrorCode::ProjectSaveFailed.code())]
    IoError(#[from] io::Error),
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::IoError(_) => ErrorCode::ProjectSaveFailed,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Lock file guarding writes to `target`: `<target>.lock` next to it.
#[must_use]
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map_or_else(|| OsString::from("project"), ToOwned::to_owned);
    name.push(".lock");
    target.with_file_name(name)
}

/// RAII guard for the exclusive lock taken while a project file is written.
///
/// Two workspaces saving to the same path serialize on this lock instead of
/// interleaving their writes.
#[derive(Debug)]
pub struct SaveLock {
    file: File,
    path: PathBuf,
}

impl SaveLock {
    /// Acquire an exclusive advisory lock on the lock file for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if another holder keeps the lock for
    /// longer than `timeout`, or [`LockError::IoError`] if the lock file
    /// cannot be created.
    pub fn acquire(target: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = lock_path_for(target);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;

            if file.try_lock_exclusive().is_ok() {
                return Ok(Self { file, path });
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path,
                    waited: start.elapsed(),
                });
            }

            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Explicitly release the lock. Release also happens automatically on drop.
    pub fn release(self) {
        drop(self);
    }

    /// Return the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SaveLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/tmp/a/project.json")),
            PathBuf::from("/tmp/a/project.json.lock")
        );
    }

    #[test]
    fn acquire_and_release() -> Result<(), LockError> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("p.json");
        let lock = SaveLock::acquire(&target, Duration::from_millis(50))?;
        assert_eq!(lock.path(), dir.path().join("p.json.lock"));
        lock.release();
        let _again = SaveLock::acquire(&target, Duration::from_millis(50))?;
        Ok(())
    }

    #[test]
    fn times_out_when_held() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("p.json");
        let _guard = SaveLock::acquire(&target, Duration::from_millis(50)).expect("first");
        let err = SaveLock::acquire(&target, Duration::from_millis(20)).expect_err("held");
        assert!(matches!(err, LockError::Timeout { .. }));
        assert_eq!(err.code(), ErrorCode::LockContention);
        assert!(err.hint().is_some());
    }

    #[test]
    fn contention_resolves_after_holder_releases() -> Result<(), LockError> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("p.json");

        let held = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let (held_t, release_t, target_t) =
            (Arc::clone(&held), Arc::clone(&release), target.clone());
        let handle = thread::spawn(move || {
            let _lock = SaveLock::acquire(&target_t, Duration::from_millis(200)).expect("holder");
            held_t.wait();
            release_t.wait();
        });

        held.wait();
        assert!(matches!(
            SaveLock::acquire(&target, Duration::from_millis(20)),
            Err(LockError::Timeout { .. })
        ));
        release.wait();
        handle.join().expect("join");

        let _lock = SaveLock::acquire(&target, Duration::from_millis(200))?;
        Ok(())
    }
}
