//! Age-based cleanup of the backup directory.

use crate::config::Config;
use crate::store::{BackupStore, StoreEntry};
use crate::utils::errors::{BackupError, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanResult {
    pub removed: Vec<PathBuf>,
    pub removed_count: usize,
    pub bytes_freed: u64,
    /// Nothing was deleted; `removed` lists what would have been
    pub dry_run: bool,
}

/// Deletes archives and manifests by last-modified time.
pub struct RetentionSweeper {
    store: BackupStore,
}

impl RetentionSweeper {
    pub fn new(config: &Config) -> Self {
        Self {
            store: BackupStore::new(&config.storage.backup_dir),
        }
    }

    /// Entries last modified before `now - max_age_days`.
    pub fn expired(&self, max_age_days: u32, now: SystemTime) -> Result<Vec<StoreEntry>> {
        let age = Duration::from_secs(u64::from(max_age_days) * SECS_PER_DAY);
        let Some(cutoff) = now.checked_sub(age) else {
            return Ok(Vec::new());
        };

        Ok(self
            .store
            .entries()?
            .into_iter()
            .filter(|e| e.modified < cutoff)
            .collect())
    }

    pub fn clean(&self, max_age_days: u32) -> Result<CleanResult> {
        self.sweep(max_age_days, false)
    }

    /// Report what `clean` would remove without deleting anything.
    pub fn preview(&self, max_age_days: u32) -> Result<CleanResult> {
        self.sweep(max_age_days, true)
    }

    fn sweep(&self, max_age_days: u32, dry_run: bool) -> Result<CleanResult> {
        info!(
            dir = %self.store.root().display(),
            max_age_days,
            dry_run,
            "Cleaning backups older than {} days",
            max_age_days
        );

        let mut result = CleanResult {
            dry_run,
            ..Default::default()
        };

        for entry in self.expired(max_age_days, SystemTime::now())? {
            if !dry_run {
                match std::fs::remove_file(&entry.path) {
                    Ok(()) => {}
                    // Already gone
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(BackupError::io(&entry.path)(e)),
                }
            }
            debug!(file = %entry.file_name, size = entry.size, dry_run, "Expired backup file");

            result.bytes_freed += entry.size;
            result.removed.push(entry.path);
        }
        result.removed_count = result.removed.len();

        info!(
            removed = result.removed_count,
            bytes_freed = result.bytes_freed,
            dry_run,
            "Cleanup finished"
        );
        Ok(result)
    }
}
