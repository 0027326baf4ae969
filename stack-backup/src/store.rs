//! Enumeration of the flat backup directory.
//!
//! Only files whose names follow the artifact or manifest grammar are
//! reported; temporary files from an in-progress pack and anything foreign
//! are invisible to listing and retention.

use crate::archive::naming::{parse_manifest_name, ArchiveName, RunId};
use crate::utils::errors::{BackupError, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Archive(ArchiveName),
    Manifest(RunId),
}

impl EntryKind {
    pub fn classify(file_name: &str) -> Option<Self> {
        if let Some(run_id) = parse_manifest_name(file_name) {
            return Some(EntryKind::Manifest(run_id));
        }
        ArchiveName::parse(file_name).map(EntryKind::Archive)
    }
}

#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
}

/// Read-only view of the backup directory
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All recognised artifacts and manifests, sorted by file name. A missing
    /// backup directory holds nothing.
    pub fn entries(&self) -> Result<Vec<StoreEntry>> {
        let dir = match std::fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::io(&self.root)(e)),
        };

        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(BackupError::io(&self.root))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(kind) = EntryKind::classify(&file_name) else {
                continue;
            };

            let path = entry.path();
            // A concurrent sweep may have removed it since read_dir
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BackupError::io(&path)(e)),
            };
            let modified = metadata.modified().map_err(BackupError::io(&path))?;

            entries.push(StoreEntry {
                path,
                file_name,
                kind,
                size: metadata.len(),
                modified,
            });
        }

        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }

    pub fn archives(&self) -> Result<Vec<(ArchiveName, StoreEntry)>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter_map(|e| match &e.kind {
                EntryKind::Archive(name) => Some((name.clone(), e)),
                EntryKind::Manifest(_) => None,
            })
            .collect())
    }

    pub fn manifests(&self) -> Result<Vec<(RunId, StoreEntry)>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter_map(|e| match e.kind {
                EntryKind::Manifest(run_id) => Some((run_id, e)),
                EntryKind::Archive(_) => None,
            })
            .collect())
    }

    /// Resolve a restore target given either as a path or as a bare file name
    /// inside the backup directory.
    pub fn resolve(&self, target: &Path) -> Result<PathBuf> {
        if target.is_file() {
            return Ok(target.to_path_buf());
        }
        if target.components().count() == 1 {
            let inside = self.root.join(target);
            if inside.is_file() {
                return Ok(inside);
            }
        }
        Err(BackupError::ArchiveNotFound(target.to_path_buf()))
    }
}
