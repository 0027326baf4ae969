//! Backup executor - orchestrates one backup run.
//!
//! A run ties together:
//! - Lifecycle coordinator (pause/resume of the service group)
//! - Archive codec (one artifact per component, packed on the blocking pool)
//! - Manifest writer (one manifest per completed run)

pub mod manifest;

use crate::archive::naming::{ArchiveName, RunId};
use crate::archive::{ArchiveCodec, ArtifactDescriptor, Packed};
use crate::config::Config;
use crate::fs::walker::TreeStats;
use crate::lifecycle::{ContainerController, LifecycleCoordinator};
use crate::store::BackupStore;
use crate::utils::errors::{BackupError, Result};
use manifest::{Manifest, ManifestArchive, ManifestFailure, SourceSize};
use chrono::Local;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Whether the service group is paused while its data is archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyMode {
    /// Stop the group first, restart it afterwards
    Consistent,
    /// Archive live data; faster, but files may be captured mid-write
    Quick,
}

impl fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConsistencyMode::Consistent => "consistent",
            ConsistencyMode::Quick => "quick",
        })
    }
}

impl FromStr for ConsistencyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "consistent" => Ok(ConsistencyMode::Consistent),
            "quick" => Ok(ConsistencyMode::Quick),
            other => Err(format!("unknown consistency mode: {}", other)),
        }
    }
}

/// Backup run configuration
#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Components to archive; empty means every configured component
    pub components: Vec<String>,
    pub mode: ConsistencyMode,
}

/// A component archived by the run
#[derive(Debug, Clone)]
pub struct ArchivedComponent {
    pub component: String,
    pub artifact: ArtifactDescriptor,
    pub source: TreeStats,
}

/// A component the run could not archive
#[derive(Debug)]
pub struct ComponentFailure {
    pub component: String,
    pub error: BackupError,
}

/// Backup execution result
#[derive(Debug)]
pub struct BackupReport {
    pub run_id: RunId,
    pub mode: ConsistencyMode,
    /// Sorted by component name
    pub archives: Vec<ArchivedComponent>,
    /// Sorted by component name
    pub failures: Vec<ComponentFailure>,
    pub manifest_path: PathBuf,
    /// The group was running and got stopped (and restarted) by this run
    pub paused_group: bool,
    pub duration: Duration,
}

impl BackupReport {
    pub fn total_archive_bytes(&self) -> u64 {
        self.archives.iter().map(|a| a.artifact.size).sum()
    }

    pub fn total_source_bytes(&self) -> u64 {
        self.archives.iter().map(|a| a.source.bytes).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Main backup executor
pub struct BackupExecutor<C> {
    config: Arc<Config>,
    codec: ArchiveCodec,
    store: BackupStore,
    lifecycle: LifecycleCoordinator<C>,
}

impl<C: ContainerController> BackupExecutor<C> {
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

    /// Resolve the requested names against the configured set, sorted and
    /// de-duplicated.
    fn select(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            let all: BTreeSet<_> = self.config.backup.components.iter().cloned().collect();
            return Ok(all.into_iter().collect());
        }

        let mut selected = BTreeSet::new();
        for name in requested {
            if !self.config.is_known_component(name) {
                return Err(BackupError::UnknownComponent(name.clone()));
            }
            selected.insert(name.clone());
        }
        Ok(selected.into_iter().collect())
    }

    /// A run id no earlier run has used. Runs are named to the second, so a
    /// run started in the same second as the previous one waits for the next.
    async fn fresh_run_id(&self) -> Result<RunId> {
        let taken: BTreeSet<RunId> = self
            .store
            .manifests()?
            .into_iter()
            .map(|(run_id, _)| run_id)
            .chain(
                self.store
                    .archives()?
                    .into_iter()
                    .filter(|(name, _)| !name.safety)
                    .map(|(name, _)| name.run_id),
            )
            .collect();

        let run_id = RunId::now();
        if !taken.contains(&run_id) {
            return Ok(run_id);
        }

        let subsec = u64::from(Local::now().timestamp_subsec_millis());
        let wait = Duration::from_millis(1000u64.saturating_sub(subsec).max(1));
        info!(run_id = %run_id, "Run id already in use, waiting {:?}", wait);
        tokio::time::sleep(wait).await;

        let run_id = RunId::now();
        if taken.contains(&run_id) {
            return Err(BackupError::RunExists(run_id));
        }
        Ok(run_id)
    }

    /// Execute a backup run
    pub async fn run(&self, request: BackupRequest) -> Result<BackupReport> {
        let started = Instant::now();
        let components = self.select(&request.components)?;
        let run_id = self.fresh_run_id().await?;

        info!(
            run_id = %run_id,
            mode = %request.mode,
            compression = %self.codec.compression(),
            "Starting backup of {} component(s): {}",
            components.len(),
            components.join(", ")
        );

        let paused_group = match request.mode {
            ConsistencyMode::Consistent => self.lifecycle.pause().await?,
            ConsistencyMode::Quick => {
                info!("Quick mode: archiving without stopping the service group");
                false
            }
        };

        let outcomes = self.archive_all(run_id, &components).await;

        let mut archives = Vec::new();
        let mut failures = Vec::new();
        for (component, outcome) in outcomes {
            match outcome {
                Ok(Packed { artifact, source }) => archives.push(ArchivedComponent {
                    component,
                    artifact,
                    source,
                }),
                Err(error) => failures.push(ComponentFailure { component, error }),
            }
        }

        let manifest = Manifest {
            run_id,
            mode: request.mode,
            compression: self.codec.compression(),
            components: archives.iter().map(|a| a.component.clone()).collect(),
            archives: archives
                .iter()
                .map(|a| ManifestArchive {
                    file_name: a.artifact.file_name.clone(),
                    size: a.artifact.size,
                })
                .collect(),
            source_sizes: archives
                .iter()
                .map(|a| SourceSize {
                    component: a.component.clone(),
                    bytes: a.source.bytes,
                    files: a.source.files,
                })
                .collect(),
            failures: failures
                .iter()
                .map(|f| ManifestFailure {
                    component: f.component.clone(),
                    reason: f.error.to_string(),
                })
                .collect(),
        };
        let written = manifest.write(&self.config.storage.backup_dir);

        // Restart regardless of how archiving went
        let resumed = self.lifecycle.resume(paused_group).await;

        let manifest_path = written?;
        resumed?;

        let report = BackupReport {
            run_id,
            mode: request.mode,
            archives,
            failures,
            manifest_path,
            paused_group,
            duration: started.elapsed(),
        };

        info!(
            run_id = %run_id,
            archived = report.archives.len(),
            failed = report.failures.len(),
            bytes = report.total_archive_bytes(),
            "Backup completed in {:.1}s",
            report.duration.as_secs_f64()
        );

        Ok(report)
    }

    /// Pack every component on the blocking pool, at most `workers` at a time.
    /// Results come back in `components` order.
    async fn archive_all(&self, run_id: RunId, components: &[String]) -> Vec<(String, Result<Packed>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.backup.workers));
        let mut handles = Vec::with_capacity(components.len());

        for component in components {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let codec = self.codec;
            let source = self.config.component_dir(component);
            let dest = self
                .config
                .storage
                .backup_dir
                .join(ArchiveName::new(component, run_id, codec.compression()).file_name());

            info!(component = %component, "Archiving {}", source.display());
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                codec.pack(&source, &dest)
            });
            handles.push((component.clone(), handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (component, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(BackupError::Io {
                    path: self.config.component_dir(&component),
                    source: std::io::Error::other(e),
                }),
            };

            match &outcome {
                Ok(packed) => info!(
                    component = %component,
                    artifact = %packed.artifact.file_name,
                    size = packed.artifact.size,
                    "Archived component"
                ),
                Err(e) if e.is_component_scoped() => {
                    warn!(component = %component, "Failed to archive component: {}", e)
                }
                Err(e) => error!(component = %component, "Failed to archive component: {}", e),
            }
            outcomes.push((component, outcome));
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Compression;
    use crate::store::BackupStore;
    use crate::test_support::{write_tree, FakeController};
    use tempfile::TempDir;

    fn setup(components: &[&str], present: &[&str]) -> (TempDir, Arc<Config>) {
        let temp = TempDir::new().unwrap();
        let config = Config::for_test(temp.path(), components);
        for name in present {
            write_tree(
                &config.component_dir(name),
                &[("data.db", name.as_bytes()), ("wal/0001", b"wal")],
            );
        }
        (temp, Arc::new(config))
    }

    fn request(components: &[&str], mode: ConsistencyMode) -> BackupRequest {
        BackupRequest {
            components: components.iter().map(|c| c.to_string()).collect(),
            mode,
        }
    }

    #[tokio::test]
    async fn test_partial_failure_isolation() {
        let (_temp, config) = setup(&["a", "b", "c"], &["a", "c"]);
        let executor = BackupExecutor::new(config.clone(), FakeController::stopped()).unwrap();

        let report = executor.run(request(&[], ConsistencyMode::Quick)).await.unwrap();

        let archived: Vec<_> = report.archives.iter().map(|a| a.component.as_str()).collect();
        assert_eq!(archived, vec!["a", "c"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].component, "b");
        assert!(matches!(report.failures[0].error, BackupError::SourceMissing { .. }));
        for archive in &report.archives {
            assert!(archive.artifact.path.is_file());
        }

        let manifest = Manifest::read(&report.manifest_path).unwrap();
        assert_eq!(manifest.components, vec!["a", "c"]);
        assert_eq!(manifest.failures[0].component, "b");
    }

    #[tokio::test]
    async fn test_exactly_one_manifest_per_run() {
        let (_temp, config) = setup(&["a", "b"], &["a", "b"]);
        let executor = BackupExecutor::new(config.clone(), FakeController::stopped()).unwrap();

        let report = executor.run(request(&[], ConsistencyMode::Quick)).await.unwrap();

        let store = BackupStore::new(&config.storage.backup_dir);
        let manifests = store.manifests().unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].0, report.run_id);
        assert_eq!(store.archives().unwrap().len(), 2);
        for (name, _) in store.archives().unwrap() {
            assert_eq!(name.run_id, report.run_id);
        }
    }

    #[tokio::test]
    async fn test_consistent_mode_pauses_and_resumes() {
        let (_temp, config) = setup(&["a"], &["a"]);
        let fake = Arc::new(FakeController::running());
        let executor = BackupExecutor::new(config, fake.clone()).unwrap();

        let report = executor.run(request(&[], ConsistencyMode::Consistent)).await.unwrap();

        assert!(report.paused_group);
        assert_eq!(fake.calls(), vec!["is_running", "stop", "start"]);
        assert!(fake.is_up());
    }

    #[tokio::test]
    async fn test_consistent_mode_restarts_after_partial_failure() {
        let (_temp, config) = setup(&["a", "b"], &["a"]);
        let fake = Arc::new(FakeController::running());
        let executor = BackupExecutor::new(config, fake.clone()).unwrap();

        let report = executor.run(request(&[], ConsistencyMode::Consistent)).await.unwrap();

        assert!(!report.is_complete());
        assert_eq!(fake.calls(), vec!["is_running", "stop", "start"]);
        assert!(fake.is_up());
    }

    #[tokio::test]
    async fn test_consistent_mode_leaves_stopped_group_stopped() {
        let (_temp, config) = setup(&["a"], &["a"]);
        let fake = Arc::new(FakeController::stopped());
        let executor = BackupExecutor::new(config, fake.clone()).unwrap();

        let report = executor.run(request(&[], ConsistencyMode::Consistent)).await.unwrap();

        assert!(!report.paused_group);
        assert_eq!(fake.calls(), vec!["is_running"]);
        assert!(!fake.is_up());
    }

    #[tokio::test]
    async fn test_quick_mode_never_touches_controller() {
        let (_temp, config) = setup(&["a"], &["a"]);
        let fake = Arc::new(FakeController::running());
        fake.fail_query();
        let executor = BackupExecutor::new(config, fake.clone()).unwrap();

        executor.run(request(&[], ConsistencyMode::Quick)).await.unwrap();
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_controller_aborts_consistent_run() {
        let (_temp, config) = setup(&["a"], &["a"]);
        let fake = Arc::new(FakeController::running());
        fake.fail_query();
        let executor = BackupExecutor::new(config.clone(), fake).unwrap();

        let err = executor
            .run(request(&[], ConsistencyMode::Consistent))
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::ControllerUnavailable(_)));
        assert!(BackupStore::new(&config.storage.backup_dir)
            .entries()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_restart_is_fatal_but_keeps_manifest() {
        let (_temp, config) = setup(&["a"], &["a"]);
        let fake = Arc::new(FakeController::running());
        fake.fail_start();
        let executor = BackupExecutor::new(config.clone(), fake.clone()).unwrap();

        let err = executor
            .run(request(&[], ConsistencyMode::Consistent))
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::ControllerUnavailable(_)));
        assert_eq!(fake.calls(), vec!["is_running", "stop", "start"]);
        assert_eq!(
            BackupStore::new(&config.storage.backup_dir).manifests().unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_single_component_selector() {
        let (_temp, config) = setup(&["a", "b"], &["a", "b"]);
        let executor = BackupExecutor::new(config, FakeController::stopped()).unwrap();

        let report = executor.run(request(&["b"], ConsistencyMode::Quick)).await.unwrap();
        assert_eq!(report.archives.len(), 1);
        assert_eq!(report.archives[0].component, "b");

        let err = executor
            .run(request(&["nope"], ConsistencyMode::Quick))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::UnknownComponent(ref n) if n == "nope"));
    }

    #[tokio::test]
    async fn test_single_metrics_component_end_to_end() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::for_test(temp.path(), &["metrics"]);
        config.backup.compression = "gzip".into();
        let config = Arc::new(config);

        let block = |seed: u8, len: usize| -> Vec<u8> {
            (0..len).map(|i| seed.wrapping_add((i % 251) as u8)).collect()
        };
        let (f1, f2, f3) = (block(1, 4096), block(2, 4096), block(3, 2048));
        write_tree(
            &config.component_dir("metrics"),
            &[("index", &f1), ("chunks/0001", &f2), ("meta.json", &f3)],
        );

        let executor = BackupExecutor::new(config.clone(), FakeController::stopped()).unwrap();
        let report = executor.run(request(&[], ConsistencyMode::Quick)).await.unwrap();

        assert_eq!(report.archives.len(), 1);
        let archived = &report.archives[0];
        assert_eq!(
            archived.artifact.file_name,
            format!("metrics_{}.tar.gz", report.run_id)
        );
        assert_eq!(archived.artifact.compression, Compression::Gzip);
        assert_eq!(archived.source, TreeStats { files: 3, bytes: 10 * 1024 });
        assert!(archived.artifact.size > 0);
        assert!(archived.artifact.size < 10 * 1024 + 2048);

        let text = std::fs::read_to_string(&report.manifest_path).unwrap();
        assert!(text.contains("Components: metrics\n"));
        assert!(text.contains("  metrics  10240 bytes  3 files  (10.00 KB)\n"));
    }

    #[tokio::test]
    async fn test_back_to_back_runs_keep_both() {
        let (_temp, config) = setup(&["a"], &["a"]);
        let executor = BackupExecutor::new(config.clone(), FakeController::stopped()).unwrap();

        let first = executor.run(request(&[], ConsistencyMode::Quick)).await.unwrap();
        let second = executor.run(request(&[], ConsistencyMode::Quick)).await.unwrap();

        assert!(second.run_id > first.run_id);
        assert_ne!(first.manifest_path, second.manifest_path);
        assert!(first.archives[0].artifact.path.is_file());
        assert!(second.archives[0].artifact.path.is_file());

        let store = BackupStore::new(&config.storage.backup_dir);
        assert_eq!(store.manifests().unwrap().len(), 2);
        assert_eq!(store.archives().unwrap().len(), 2);
        let reread = Manifest::read(&first.manifest_path).unwrap();
        assert_eq!(reread.run_id, first.run_id);
    }

    #[tokio::test]
    async fn test_run_id_taken_by_later_runs_is_refused() {
        let (_temp, config) = setup(&["a"], &["a"]);
        let dir = &config.storage.backup_dir;
        std::fs::create_dir_all(dir).unwrap();
        // Backups stamped by a clock running ahead of this one
        let mut run_id = RunId::now();
        let mut existing = Vec::new();
        for _ in 0..4 {
            let path = dir.join(crate::archive::naming::manifest_file_name(run_id));
            std::fs::write(&path, b"earlier").unwrap();
            existing.push(path);
            run_id = run_id.next();
        }

        let executor = BackupExecutor::new(config.clone(), FakeController::stopped()).unwrap();
        let err = executor.run(request(&[], ConsistencyMode::Quick)).await.unwrap_err();

        assert!(matches!(err, BackupError::RunExists(_)));
        for path in existing {
            assert_eq!(std::fs::read(path).unwrap(), b"earlier");
        }
        assert!(BackupStore::new(dir).archives().unwrap().is_empty());
    }
}
