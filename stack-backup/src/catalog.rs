//! Listing of prior backup runs, read back from their manifests.

use crate::archive::naming::{ArchiveName, RunId};
use crate::archive::Compression;
use crate::config::Config;
use crate::executor::manifest::{Manifest, ManifestFailure, SourceSize};
use crate::executor::ConsistencyMode;
use crate::store::{BackupStore, StoreEntry};
use crate::utils::errors::Result;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::warn;

/// An archive referenced by a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogArchive {
    pub file_name: String,
    /// Current size on disk, or the recorded size when the file is gone
    pub size: u64,
    pub present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub timestamp: NaiveDateTime,
    pub mode: ConsistencyMode,
    pub compression: Compression,
    pub components: Vec<String>,
    pub archives: Vec<CatalogArchive>,
    pub source_sizes: Vec<SourceSize>,
    pub failures: Vec<ManifestFailure>,
    pub manifest_path: PathBuf,
    /// Older than the retention threshold; advisory only
    pub expired: bool,
}

impl RunSummary {
    pub fn archive_bytes(&self) -> u64 {
        self.archives.iter().map(|a| a.size).sum()
    }
}

/// An archive no manifest refers to, such as a pre-restore safety archive
#[derive(Debug, Clone, Serialize)]
pub struct LooseArchive {
    #[serde(flatten)]
    pub name: ArchiveName,
    pub file_name: String,
    pub size: u64,
    pub expired: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Listing {
    /// Most recent first
    pub runs: Vec<RunSummary>,
    /// Most recent first
    pub loose: Vec<LooseArchive>,
}

impl Listing {
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty() && self.loose.is_empty()
    }
}

pub struct Catalog {
    store: BackupStore,
    retention_days: u32,
}

impl Catalog {
    pub fn new(config: &Config) -> Self {
        Self {
            store: BackupStore::new(&config.storage.backup_dir),
            retention_days: config.backup.retention_days,
        }
    }

    pub fn list(&self) -> Result<Listing> {
        self.list_at(SystemTime::now())
    }

    fn list_at(&self, now: SystemTime) -> Result<Listing> {
        let age = Duration::from_secs(u64::from(self.retention_days) * 86_400);
        let cutoff = now.checked_sub(age);
        let is_expired = |entry: &StoreEntry| cutoff.is_some_and(|c| entry.modified < c);

        let entries = self.store.entries()?;
        let by_name: HashMap<&str, &StoreEntry> =
            entries.iter().map(|e| (e.file_name.as_str(), e)).collect();

        let mut runs = Vec::new();
        let mut referenced = HashSet::new();
        for (run_id, entry) in self.store.manifests()? {
            let manifest = match Manifest::read(&entry.path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Skipping manifest: {}", e);
                    continue;
                }
            };

            let mut expired = is_expired(&entry);
            let archives = manifest
                .archives
                .iter()
                .map(|a| {
                    referenced.insert(a.file_name.clone());
                    match by_name.get(a.file_name.as_str()) {
                        Some(on_disk) => {
                            expired |= is_expired(on_disk);
                            CatalogArchive {
                                file_name: a.file_name.clone(),
                                size: on_disk.size,
                                present: true,
                            }
                        }
                        None => CatalogArchive {
                            file_name: a.file_name.clone(),
                            size: a.size,
                            present: false,
                        },
                    }
                })
                .collect();

            runs.push(RunSummary {
                run_id,
                timestamp: run_id.timestamp(),
                mode: manifest.mode,
                compression: manifest.compression,
                components: manifest.components,
                archives,
                source_sizes: manifest.source_sizes,
                failures: manifest.failures,
                manifest_path: entry.path,
                expired,
            });
        }
        runs.sort_by(|a, b| b.run_id.cmp(&a.run_id));

        let mut loose: Vec<_> = self
            .store
            .archives()?
            .into_iter()
            .filter(|(_, entry)| !referenced.contains(&entry.file_name))
            .map(|(name, entry)| LooseArchive {
                expired: is_expired(&entry),
                name,
                file_name: entry.file_name,
                size: entry.size,
            })
            .collect();
        loose.sort_by(|a, b| {
            b.name
                .run_id
                .cmp(&a.name.run_id)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });

        Ok(Listing { runs, loose })
    }
}
