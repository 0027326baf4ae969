//! Per-run manifest, a human-readable text record of one backup run.
//!
//! ```text
//! Backup Manifest
//! ===============
//! Run: 20261016_090507
//! Date: 2026-10-16 09:05:07 +02:00
//! Mode: consistent
//! Compression: gzip
//! Components: grafana, prometheus
//!
//! Archives:
//!   grafana_20261016_090507.tar.gz  52311 bytes  (51.08 KB)
//!   prometheus_20261016_090507.tar.gz  8120334 bytes  (7.74 MB)
//! Source sizes:
//!   grafana  90112 bytes  14 files  (88.00 KB)
//!   prometheus  20480113 bytes  311 files  (19.53 MB)
//! Failed:
//!   loki: Source directory missing for component 'loki': ./container-data/loki
//! ```

use super::ConsistencyMode;
use crate::archive::naming::{manifest_file_name, RunId};
use crate::archive::Compression;
use crate::utils::errors::{BackupError, Result};
use crate::utils::format::format_bytes;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const TITLE: &str = "Backup Manifest";

/// One archive produced by the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestArchive {
    pub file_name: String,
    pub size: u64,
}

/// Size of a component's data directory at run time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSize {
    pub component: String,
    pub bytes: u64,
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestFailure {
    pub component: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub run_id: RunId,
    pub mode: ConsistencyMode,
    pub compression: Compression,
    /// Components archived successfully, sorted by name
    pub components: Vec<String>,
    pub archives: Vec<ManifestArchive>,
    pub source_sizes: Vec<SourceSize>,
    pub failures: Vec<ManifestFailure>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Header,
    Archives,
    Sources,
    Failed,
}

impl Manifest {
    pub fn file_name(&self) -> String {
        manifest_file_name(self.run_id)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let date = match self.run_id.local() {
            Some(local) => local.format("%Y-%m-%d %H:%M:%S %:z").to_string(),
            None => self.run_id.timestamp().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        let components = if self.components.is_empty() {
            "(none)".to_string()
        } else {
            self.components.join(", ")
        };

        // Writing to a String cannot fail
        let _ = writeln!(out, "{}", TITLE);
        let _ = writeln!(out, "{}", "=".repeat(TITLE.len()));
        let _ = writeln!(out, "Run: {}", self.run_id);
        let _ = writeln!(out, "Date: {}", date);
        let _ = writeln!(out, "Mode: {}", self.mode);
        let _ = writeln!(out, "Compression: {}", self.compression);
        let _ = writeln!(out, "Components: {}", components);
        let _ = writeln!(out);

        let _ = writeln!(out, "Archives:");
        for a in &self.archives {
            let _ = writeln!(out, "  {}  {} bytes  ({})", a.file_name, a.size, format_bytes(a.size));
        }
        let _ = writeln!(out, "Source sizes:");
        for s in &self.source_sizes {
            let _ = writeln!(
                out,
                "  {}  {} bytes  {} files  ({})",
                s.component,
                s.bytes,
                s.files,
                format_bytes(s.bytes)
            );
        }
        if !self.failures.is_empty() {
            let _ = writeln!(out, "Failed:");
            for f in &self.failures {
                let _ = writeln!(out, "  {}: {}", f.component, f.reason);
            }
        }
        out
    }

    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut lines = text.lines();
        if lines.next().map(str::trim_end) != Some(TITLE) {
            return Err("missing manifest title".into());
        }

        let mut run_id = None;
        let mut mode = None;
        let mut compression = None;
        let mut components = Vec::new();
        let mut archives = Vec::new();
        let mut source_sizes = Vec::new();
        let mut failures = Vec::new();
        let mut section = Section::Header;

        for (idx, raw) in lines.enumerate() {
            let line = raw.trim_end();
            let bad = |what: &str| format!("line {}: {}: {:?}", idx + 2, what, line);

            if line.is_empty() || line.chars().all(|c| c == '=') {
                continue;
            }

            match line {
                "Archives:" => {
                    section = Section::Archives;
                    continue;
                }
                "Source sizes:" => {
                    section = Section::Sources;
                    continue;
                }
                "Failed:" => {
                    section = Section::Failed;
                    continue;
                }
                _ => {}
            }

            let item = line.trim_start();
            match section {
                Section::Header => {
                    let (key, value) = line.split_once(": ").ok_or_else(|| bad("expected `Key: value`"))?;
                    match key {
                        "Run" => run_id = Some(RunId::parse(value).ok_or_else(|| bad("bad run id"))?),
                        "Mode" => mode = Some(value.parse().map_err(|_| bad("bad mode"))?),
                        "Compression" => {
                            compression = Some(value.parse().map_err(|_| bad("bad compression"))?)
                        }
                        "Components" if value != "(none)" => {
                            components = value.split(", ").map(str::to_string).collect()
                        }
                        _ => {}
                    }
                }
                Section::Archives => {
                    let mut fields = item.split_whitespace();
                    let file_name = fields.next().ok_or_else(|| bad("missing archive name"))?;
                    let size = fields
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| bad("missing archive size"))?;
                    archives.push(ManifestArchive {
                        file_name: file_name.to_string(),
                        size,
                    });
                }
                Section::Sources => {
                    let fields: Vec<&str> = item.split_whitespace().collect();
                    let (component, bytes, files) = match fields.as_slice() {
                        [c, b, "bytes", f, "files", ..] => (*c, b.parse().ok(), f.parse().ok()),
                        _ => return Err(bad("bad source size")),
                    };
                    source_sizes.push(SourceSize {
                        component: component.to_string(),
                        bytes: bytes.ok_or_else(|| bad("bad byte count"))?,
                        files: files.ok_or_else(|| bad("bad file count"))?,
                    });
                }
                Section::Failed => {
                    let (component, reason) = item.split_once(": ").ok_or_else(|| bad("bad failure"))?;
                    failures.push(ManifestFailure {
                        component: component.to_string(),
                        reason: reason.to_string(),
                    });
                }
            }
        }

        Ok(Manifest {
            run_id: run_id.ok_or("missing Run")?,
            mode: mode.ok_or("missing Mode")?,
            compression: compression.ok_or("missing Compression")?,
            components,
            archives,
            source_sizes,
            failures,
        })
    }

    /// Write the manifest into `dir` with the temp-then-rename discipline.
    /// An existing manifest for the same run is never replaced.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(BackupError::io(dir))?;
        let path = dir.join(self.file_name());

        let mut tmp = NamedTempFile::new_in(dir).map_err(BackupError::io(dir))?;
        tmp.write_all(self.render().as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(BackupError::io(&path))?;
        tmp.persist_noclobber(&path)
            .map_err(|e| BackupError::io(&path)(e.error))?;

        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BackupError::ManifestNotFound(path.to_path_buf()),
            _ => BackupError::io(path)(e),
        })?;
        Self::parse(&text).map_err(|reason| BackupError::InvalidManifest {
            path: path.to_path_buf(),
            reason,
        })
    }
}
