//! Restore executor - replaces a live component directory with an archive.
//!
//! Every check runs before the first side effect: the archive must exist, be
//! named after a known component, be confirmed by the caller and decode end
//! to end with that component as its only top-level directory.

use crate::archive::naming::{ArchiveName, RunId};
use crate::archive::ArchiveCodec;
use crate::config::Config;
use crate::lifecycle::{ContainerController, LifecycleCoordinator};
use crate::store::BackupStore;
use crate::utils::errors::{BackupError, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// Archive path, or a bare file name inside the backup directory
    pub archive: PathBuf,
    /// Restore is destructive and never proceeds without this
    pub confirmed: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub component: String,
    pub restored_from: PathBuf,
    /// Snapshot of the directory as it was before the restore, if one was taken
    pub safety_archive: Option<PathBuf>,
    /// The group was running and got restarted
    pub restarted: bool,
    pub duration: Duration,
}

pub struct RestoreExecutor<C> {
    config: Arc<Config>,
    codec: ArchiveCodec,
    store: BackupStore,
    lifecycle: LifecycleCoordinator<C>,
}

impl<C: ContainerController> RestoreExecutor<C> {
    pub fn new(config: Arc<Config>, controller: C) -> Result<Self> {
        let codec = ArchiveCodec::from_config(&config)?;
        let store = BackupStore::new(&config.storage.backup_dir);
        let lifecycle = LifecycleCoordinator::new(controller, config.settle_period());
        Ok(Self {
            config,
            codec,
            store,
            lifecycle,
        })
    }

    /// Resolve and parse the target without touching anything.
    pub fn identify(&self, archive: &Path) -> Result<(PathBuf, ArchiveName)> {
        let path = self.store.resolve(archive)?;
        let file_name = path
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or_else(|| BackupError::InvalidArchiveName(path.display().to_string()))?;
        let name = ArchiveName::parse(file_name)
            .ok_or_else(|| BackupError::InvalidArchiveName(file_name.to_string()))?;

        if !self.config.is_known_component(&name.component) {
            return Err(BackupError::UnknownComponent(name.component));
        }
        Ok((path, name))
    }

    pub async fn run(&self, request: RestoreRequest) -> Result<RestoreReport> {
        let started = Instant::now();
        let (artifact, name) = self.identify(&request.archive)?;
        let component = name.component;

        if !request.confirmed {
            return Err(BackupError::NotConfirmed(artifact));
        }

        self.verify(&artifact, &component).await?;

        info!(
            component = %component,
            archive = %artifact.display(),
            "Restoring component"
        );

        let was_running = self.lifecycle.pause().await?;

        let live = self.config.component_dir(&component);
        let safety_dest = self.safety_dest(&component, &artifact);
        let codec = self.codec;
        let source = artifact.clone();
        let replaced = tokio::task::spawn_blocking(move || {
            replace_component(codec, &live, &safety_dest, &source)
        })
        .await
        .unwrap_or_else(|e| {
            Err(BackupError::Io {
                path: self.config.component_dir(&component),
                source: std::io::Error::other(e),
            })
        });

        // Restart regardless of how the replacement went
        let resumed = self.lifecycle.resume(was_running).await;

        let safety_archive = replaced?;
        resumed?;

        let report = RestoreReport {
            component,
            restored_from: artifact,
            safety_archive,
            restarted: was_running,
            duration: started.elapsed(),
        };
        info!(
            component = %report.component,
            restarted = report.restarted,
            "Restore completed in {:.1}s",
            report.duration.as_secs_f64()
        );
        Ok(report)
    }

    /// First free safety archive path, never the archive being restored.
    fn safety_dest(&self, component: &str, artifact: &Path) -> PathBuf {
        let mut run_id = RunId::now();
        loop {
            let name = ArchiveName::safety(component, run_id, self.codec.compression());
            let dest = self.config.storage.backup_dir.join(name.file_name());
            if dest != artifact && !dest.exists() {
                return dest;
            }
            run_id = run_id.next();
        }
    }

    /// Decode the whole archive and check it holds exactly `component`.
    async fn verify(&self, artifact: &Path, component: &str) -> Result<()> {
        let path = artifact.to_path_buf();
        let contents = tokio::task::spawn_blocking(move || ArchiveCodec::verify(&path))
            .await
            .unwrap_or_else(|e| {
                Err(BackupError::Io {
                    path: artifact.to_path_buf(),
                    source: std::io::Error::other(e),
                })
            })?;

        if contents.roots.len() != 1 || !contents.roots.contains(component) {
            return Err(BackupError::CorruptArchive {
                path: artifact.to_path_buf(),
                reason: format!(
                    "expected a single top-level directory '{}', found {:?}",
                    component, contents.roots
                ),
            });
        }
        Ok(())
    }
}

/// Snapshot `live` (best effort), unpack `artifact` into a staging directory
/// next to it, then swap the staged tree into place.
fn replace_component(
    codec: ArchiveCodec,
    live: &Path,
    safety_dest: &Path,
    artifact: &Path,
) -> Result<Option<PathBuf>> {
    let parent = live
        .parent()
        .ok_or_else(|| BackupError::Config(format!("no parent for {}", live.display())))?;
    let component = live
        .file_name()
        .ok_or_else(|| BackupError::Config(format!("no component in {}", live.display())))?;

    let safety_archive = if live.exists() {
        match codec.pack(live, safety_dest) {
            Ok(packed) => {
                info!(
                    archive = %packed.artifact.file_name,
                    "Created pre-restore safety archive"
                );
                Some(packed.artifact.path)
            }
            Err(e) => {
                warn!("Could not create pre-restore safety archive, continuing: {}", e);
                None
            }
        }
    } else {
        None
    };

    std::fs::create_dir_all(parent).map_err(BackupError::io(parent))?;
    let staging = tempfile::Builder::new()
        .prefix(".restore-")
        .tempdir_in(parent)
        .map_err(BackupError::io(parent))?;
    ArchiveCodec::unpack(artifact, staging.path())?;

    match std::fs::symlink_metadata(live) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(live),
        Ok(_) => std::fs::remove_file(live),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
    .map_err(BackupError::io(live))?;

    let staged = staging.path().join(component);
    std::fs::rename(&staged, live).map_err(BackupError::io(live))?;

    Ok(safety_archive)
}
