//! Docker Compose backed [`ContainerController`].

use super::ContainerController;
use crate::config::ControllerConfig;
use crate::utils::errors::{BackupError, Result};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Drives the service group through `<program> compose -f <file> ...`.
#[derive(Debug, Clone)]
pub struct DockerCompose {
    program: String,
    project_dir: PathBuf,
    compose_file: PathBuf,
    group: String,
}

impl DockerCompose {
    pub fn new(config: &ControllerConfig) -> Self {
        let group = config
            .project_dir
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| config.compose_file.display().to_string());

        Self {
            program: config.program.clone(),
            project_dir: config.project_dir.clone(),
            compose_file: config.compose_file.clone(),
            group,
        }
    }

    /// Run one compose subcommand, returning its stdout.
    async fn compose(&self, args: &[&str]) -> Result<String> {
        let rendered = format!("{} compose {}", self.program, args.join(" "));
        debug!(command = %rendered, "Running container controller");

        let output = Command::new(&self.program)
            .arg("compose")
            .arg("-f")
            .arg(&self.compose_file)
            .args(args)
            .current_dir(&self.project_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                BackupError::ControllerUnavailable(format!("failed to run `{}`: {}", rendered, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackupError::ControllerUnavailable(format!(
                "`{}` exited with {}: {}",
                rendered,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ContainerController for DockerCompose {
    fn group(&self) -> &str {
        &self.group
    }

    async fn is_running(&self) -> Result<bool> {
        let stdout = self.compose(&["ps", "--status", "running", "--quiet"]).await?;
        Ok(!stdout.trim().is_empty())
    }

    async fn stop(&self) -> Result<()> {
        self.compose(&["stop"]).await.map(|_| ())
    }

    async fn start(&self) -> Result<()> {
        self.compose(&["start"]).await.map(|_| ())
    }
}
