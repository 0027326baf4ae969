//! Error taxonomy for backup, restore and retention operations.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Source directory missing for component '{component}': {}", path.display())]
    SourceMissing { component: String, path: PathBuf },

    #[error("Compression scheme unavailable: {0} (expected gzip, zstd or none)")]
    CompressionUnavailable(String),

    #[error("Archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error("Manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("Unreadable manifest {}: {reason}", path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Corrupt archive {}: {reason}", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Container controller unavailable: {0}")]
    ControllerUnavailable(String),

    #[error("Restore of {} not confirmed", .0.display())]
    NotConfirmed(PathBuf),

    #[error("Not a backup archive name: {0}")]
    InvalidArchiveName(String),

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("A backup run {0} already exists")]
    RunExists(crate::archive::naming::RunId),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BackupError {
    /// Build a `map_err` adapter that tags an I/O error with the path involved.
    pub fn io(path: impl AsRef<Path>) -> impl FnOnce(std::io::Error) -> BackupError {
        let path = path.as_ref().to_path_buf();
        move |source| BackupError::Io { path, source }
    }

    /// Whether this error only concerns one component of a multi-component run.
    pub fn is_component_scoped(&self) -> bool {
        matches!(
            self,
            BackupError::SourceMissing { .. }
                | BackupError::CorruptArchive { .. }
                | BackupError::Io { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
