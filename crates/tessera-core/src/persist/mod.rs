//! Durable save, derived export, and the background worker that runs them.
//!
//! - [`ProjectSerializer`] writes and reads project files
//!   ([`JsonProjectSerializer`] is the default).
//! - [`ExportPipeline`] produces derived artifacts from a project
//!   ([`JsonExportPipeline`] is the default).
//! - [`PersistenceActor`] owns a mirror of the project on a dedicated thread
//!   and runs both against it, strictly in message order.

pub mod actor;
pub mod export;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ErrorCode;
use crate::lock::{DEFAULT_SAVE_LOCK_TIMEOUT, LockError, SaveLock};
use crate::model::Project;

pub use actor::{
    ExportRequest, ExportResult, Pending, PersistenceActor, Poll, SaveRequest, SaveResult,
};
pub use export::{ExportError, ExportOptions, ExportOutcome, ExportPipeline, JsonExportPipeline};

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid project data in {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl SerializeError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } | Self::Format { .. } => ErrorCode::ProjectLoadFailed,
            Self::Io { .. } => ErrorCode::ProjectSaveFailed,
            Self::Lock(err) => err.code(),
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Reads and writes project files.
pub trait ProjectSerializer: Send {
    /// Persist `project` at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`] on I/O, encoding or lock failure. A failed
    /// save leaves any previous file at `path` intact.
    fn save(&self, project: &Project, path: &Path) -> Result<(), SerializeError>;

    /// Read the project stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`] if the file is missing or malformed.
    fn load(&self, path: &Path) -> Result<Project, SerializeError>;
}

/// Pretty-printed JSON project files, written atomically under a save lock.
#[derive(Debug, Clone)]
pub struct JsonProjectSerializer {
    pub lock_timeout: Duration,
}

impl Default for JsonProjectSerializer {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_SAVE_LOCK_TIMEOUT,
        }
    }
}

impl ProjectSerializer for JsonProjectSerializer {
    fn save(&self, project: &Project, path: &Path) -> Result<(), SerializeError> {
        let body = serde_json::to_vec_pretty(project).map_err(|source| SerializeError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        let _lock = SaveLock::acquire(path, self.lock_timeout)?;
        write_atomic(path, &body).map_err(|err| SerializeError::io(path, err))
    }

    fn load(&self, path: &Path) -> Result<Project, SerializeError> {
        let raw = fs::read(path).map_err(|source| SerializeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| SerializeError::Format {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Write `body` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, body: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)
}
