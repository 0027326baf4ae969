//! Filename grammar of the backup directory.
//!
//! ```text
//! <component>_<YYYYMMDD_HHMMSS>.<ext>              archive
//! <component>_pre_restore_<YYYYMMDD_HHMMSS>.<ext>  pre-restore safety archive
//! manifest_<YYYYMMDD_HHMMSS>.txt                    manifest
//! ```

use super::Compression;
use chrono::{DateTime, Local, NaiveDateTime, SubsecRound, TimeZone};
use serde::{Serialize, Serializer};
use std::fmt;

pub const RUN_ID_FORMAT: &str = "%Y%m%d_%H%M%S";
const RUN_ID_LEN: usize = 15;
const SAFETY_MARKER: &str = "_pre_restore";
const MANIFEST_PREFIX: &str = "manifest_";
const MANIFEST_SUFFIX: &str = ".txt";

/// Second-resolution local timestamp identifying one backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(NaiveDateTime);

impl RunId {
    pub fn now() -> Self {
        Self(Local::now().naive_local().trunc_subsecs(0))
    }

    #[cfg(test)]
    pub fn from_datetime(timestamp: NaiveDateTime) -> Self {
        Self(timestamp.trunc_subsecs(0))
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != RUN_ID_LEN {
            return None;
        }
        NaiveDateTime::parse_from_str(s, RUN_ID_FORMAT).ok().map(Self)
    }

    /// The run id one second later
    pub fn next(&self) -> Self {
        Self(self.0 + chrono::Duration::seconds(1))
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.0
    }

    /// The run time in the local zone; `None` only inside a DST gap.
    pub fn local(&self) -> Option<DateTime<Local>> {
        Local.from_local_datetime(&self.0).earliest()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(RUN_ID_FORMAT))
    }
}

impl Serialize for RunId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identity of an archive as carried by its file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArchiveName {
    pub component: String,
    pub run_id: RunId,
    pub compression: Compression,
    /// Taken automatically right before a restore overwrote the component
    pub safety: bool,
}

impl ArchiveName {
    pub fn new(component: &str, run_id: RunId, compression: Compression) -> Self {
        Self {
            component: component.to_string(),
            run_id,
            compression,
            safety: false,
        }
    }

    pub fn safety(component: &str, run_id: RunId, compression: Compression) -> Self {
        Self {
            safety: true,
            ..Self::new(component, run_id, compression)
        }
    }

    pub fn file_name(&self) -> String {
        let marker = if self.safety { SAFETY_MARKER } else { "" };
        format!(
            "{}{}_{}{}",
            self.component,
            marker,
            self.run_id,
            self.compression.extension()
        )
    }

    /// Parse `<component>[_pre_restore]_<run id>.<ext>`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let compression = Compression::from_file_name(file_name)?;
        let stem = file_name.strip_suffix(compression.extension())?;

        // "_" + run id
        let split = stem.len().checked_sub(RUN_ID_LEN + 1)?;
        if !stem.is_char_boundary(split) {
            return None;
        }
        let (prefix, tail) = stem.split_at(split);
        let run_id = RunId::parse(tail.strip_prefix('_')?)?;

        let (component, safety) = match prefix.strip_suffix(SAFETY_MARKER) {
            Some(component) if !component.is_empty() => (component, true),
            _ => (prefix, false),
        };
        if component.is_empty() {
            return None;
        }

        Some(Self {
            component: component.to_string(),
            run_id,
            compression,
            safety,
        })
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

pub fn manifest_file_name(run_id: RunId) -> String {
    format!("{}{}{}", MANIFEST_PREFIX, run_id, MANIFEST_SUFFIX)
}

pub fn parse_manifest_name(file_name: &str) -> Option<RunId> {
    let run = file_name
        .strip_prefix(MANIFEST_PREFIX)?
        .strip_suffix(MANIFEST_SUFFIX)?;
    RunId::parse(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn run() -> RunId {
        RunId::from_datetime(
            NaiveDate::from_ymd_opt(2026, 10, 16)
                .unwrap()
                .and_hms_opt(9, 5, 7)
                .unwrap(),
        )
    }

    #[test]
    fn test_run_id_format() {
        assert_eq!(run().to_string(), "20261016_090507");
        assert_eq!(RunId::parse("20261016_090507"), Some(run()));
        assert_eq!(RunId::parse("2026-10-16 09:05"), None);
        assert_eq!(RunId::parse("20261399_090507"), None);
    }

    #[test]
    fn test_next_second() {
        assert_eq!(run().next().to_string(), "20261016_090508");
        let midnight = RunId::parse("20261016_235959").unwrap();
        assert_eq!(midnight.next().to_string(), "20261017_000000");
    }

    #[test]
    fn test_archive_file_names() {
        let name = ArchiveName::new("prometheus", run(), Compression::Gzip);
        assert_eq!(name.file_name(), "prometheus_20261016_090507.tar.gz");

        let name = ArchiveName::new("loki", run(), Compression::Zstd);
        assert_eq!(name.file_name(), "loki_20261016_090507.tar.zst");

        let name = ArchiveName::safety("tempo", run(), Compression::None);
        assert_eq!(name.file_name(), "tempo_pre_restore_20261016_090507.tar");
    }

    #[test]
    fn test_parse_archive_names() {
        let name = ArchiveName::parse("otel_collector_20261016_090507.tar.gz").unwrap();
        assert_eq!(name.component, "otel_collector");
        assert_eq!(name.run_id, run());
        assert_eq!(name.compression, Compression::Gzip);
        assert!(!name.safety);

        let name = ArchiveName::parse("grafana_pre_restore_20261016_090507.tar.zst").unwrap();
        assert_eq!(name.component, "grafana");
        assert!(name.safety);

        let name = ArchiveName::parse("metrics_20261016_090507.tar").unwrap();
        assert_eq!(name.compression, Compression::None);
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        for bad in [
            "manifest_20261016_090507.txt",
            "_20261016_090507.tar.gz",
            "metrics.tar.gz",
            "metrics_20261016.tar.gz",
            "metrics_20261016_090507.zip",
            "metrics-20261016_090507.tar.gz",
            ".tmpA1b2C3",
        ] {
            assert!(ArchiveName::parse(bad).is_none(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_manifest_names() {
        assert_eq!(manifest_file_name(run()), "manifest_20261016_090507.txt");
        assert_eq!(parse_manifest_name("manifest_20261016_090507.txt"), Some(run()));
        assert_eq!(parse_manifest_name("manifest_latest.txt"), None);
        assert_eq!(parse_manifest_name("metrics_20261016_090507.tar"), None);
    }
}
