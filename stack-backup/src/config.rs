//! Configuration management for stack-backup.
//!
//! Loads configuration from TOML file with environment variable overrides.
//! The resulting [`Config`] is handed to each orchestrator at construction.

use crate::archive::Compression;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root holding one data directory per component
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Flat directory receiving archives and manifests
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Known stateful components, each a subdirectory of `data_root`
    #[serde(default = "default_components")]
    pub components: Vec<String>,

    /// Compression scheme (gzip, zstd, none)
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Compression level (0-9 for gzip, 1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Age in days after which archives and manifests may be removed
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Maximum number of components archived concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Container runtime executable
    #[serde(default = "default_program")]
    pub program: String,

    /// Working directory for compose commands
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,

    /// Compose file, relative to `project_dir`
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,

    /// Seconds to wait after stopping the service group
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_data_root() -> PathBuf {
    PathBuf::from("./container-data")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_components() -> Vec<String> {
    ["prometheus", "grafana", "loki", "tempo"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_compression() -> String {
    "gzip".to_string()
}

fn default_compression_level() -> i32 {
    6
}

fn default_retention_days() -> u32 {
    30
}

fn default_workers() -> usize {
    2
}

fn default_program() -> String {
    "docker".to_string()
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_settle_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            backup_dir: default_backup_dir(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            components: default_components(),
            compression: default_compression(),
            compression_level: default_compression_level(),
            retention_days: default_retention_days(),
            workers: default_workers(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            project_dir: default_project_dir(),
            compose_file: default_compose_file(),
            settle_secs: default_settle_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(BackupError::io(path))?;
        toml::from_str(&content)
            .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load the optional file, then apply `.env` and process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STACK_BACKUP_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STACK_BACKUP_DATA_ROOT") {
            self.storage.data_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("STACK_BACKUP_DIR") {
            self.storage.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STACK_BACKUP_COMPRESSION") {
            self.backup.compression = v;
        }
        if let Some(v) = lookup("STACK_BACKUP_RETENTION_DAYS") {
            self.backup.retention_days = v.trim().parse().map_err(|_| {
                BackupError::Config(format!("STACK_BACKUP_RETENTION_DAYS is not a number: {}", v))
            })?;
        }
        if let Some(v) = lookup("STACK_BACKUP_LOG_LEVEL") {
            self.log.level = v;
        }
        Ok(())
    }

    /// Reject configurations the orchestrators cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.compression()?;

        if self.backup.workers == 0 {
            return Err(BackupError::Config("backup.workers must be at least 1".into()));
        }
        if self.backup.components.is_empty() {
            return Err(BackupError::Config("backup.components is empty".into()));
        }

        let mut seen = HashSet::new();
        for name in &self.backup.components {
            let plain = !name.is_empty()
                && name != "."
                && name != ".."
                && !name.contains(['/', '\\'])
                && name != "manifest";
            if !plain {
                return Err(BackupError::Config(format!("invalid component name: {:?}", name)));
            }
            if !seen.insert(name.as_str()) {
                return Err(BackupError::Config(format!("duplicate component: {}", name)));
            }
        }
        Ok(())
    }

    /// The configured compression scheme
    pub fn compression(&self) -> Result<Compression> {
        self.backup.compression.parse()
    }

    /// Data directory of one component
    pub fn component_dir(&self, component: &str) -> PathBuf {
        self.storage.data_root.join(component)
    }

    pub fn is_known_component(&self, component: &str) -> bool {
        self.backup.components.iter().any(|c| c == component)
    }

    pub fn settle_period(&self) -> Duration {
        Duration::from_secs(self.controller.settle_secs)
    }

    /// Configuration rooted in `dir`, used by tests across modules.
    #[cfg(test)]
    pub(crate) fn for_test(dir: &Path, components: &[&str]) -> Self {
        let mut config = Config::default();
        config.storage.data_root = dir.join("data");
        config.storage.backup_dir = dir.join("backups");
        config.backup.components = components.iter().map(|c| c.to_string()).collect();
        config.controller.settle_secs = 0;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backup.retention_days, 30);
        assert_eq!(config.compression().unwrap(), Compression::Gzip);
        assert_eq!(config.settle_period(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            backup_dir = "/srv/backups"

            [backup]
            components = ["metrics", "traces"]
            compression = "zstd"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backup_dir, PathBuf::from("/srv/backups"));
        assert_eq!(config.storage.data_root, PathBuf::from("./container-data"));
        assert_eq!(config.backup.components, vec!["metrics", "traces"]);
        assert_eq!(config.compression().unwrap(), Compression::Zstd);
        assert_eq!(config.backup.retention_days, 30);
        assert_eq!(config.controller.program, "docker");
    }

    #[test]
    fn test_from_file() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stack-backup.toml");
        std::fs::write(&path, "[backup]\nretention_days = 7\n").unwrap();

        let config = Config::from_file(&path)?;
        assert_eq!(config.backup.retention_days, 7);

        std::fs::write(&path, "[backup\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(BackupError::Config(_))));
        Ok(())
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STACK_BACKUP_DIR", "/mnt/backups"),
            ("STACK_BACKUP_COMPRESSION", "none"),
            ("STACK_BACKUP_RETENTION_DAYS", "14"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.storage.backup_dir, PathBuf::from("/mnt/backups"));
        assert_eq!(config.compression().unwrap(), Compression::None);
        assert_eq!(config.backup.retention_days, 14);

        let bad = config.apply_overrides(|k| {
            (k == "STACK_BACKUP_RETENTION_DAYS").then(|| "soon".to_string())
        });
        assert!(matches!(bad, Err(BackupError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.backup.compression = "bzip2".into();
        assert!(matches!(
            config.validate(),
            Err(BackupError::CompressionUnavailable(_))
        ));

        let mut config = Config::default();
        config.backup.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backup.components = vec!["loki".into(), "loki".into()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backup.components = vec!["../etc".into()];
        assert!(config.validate().is_err());
    }
}
