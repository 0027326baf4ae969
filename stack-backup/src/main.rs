//! Stack Backup - Main entry point
//!
//! Backs up, lists, restores and cleans the data directories of the
//! observability stack's containers.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use stack_backup::catalog::{Catalog, Listing};
use stack_backup::config::Config;
use stack_backup::executor::{BackupExecutor, BackupReport, BackupRequest, ConsistencyMode};
use stack_backup::lifecycle::compose::DockerCompose;
use stack_backup::restore::{RestoreExecutor, RestoreRequest};
use stack_backup::retention::{CleanResult, RetentionSweeper};
use stack_backup::utils::format::{format_age, format_bytes};
use stack_backup::{utils, BackupError};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "Back up, list, restore and clean container data directories.\n\n\
                  Without a command a full consistent backup is taken: the service \
                  group is stopped, every component is archived and the group is \
                  started again."
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Back up without stopping the service group (lower consistency)
    #[arg(long)]
    quick: bool,

    /// Back up only this component (repeatable)
    #[arg(long = "component", value_name = "NAME")]
    components: Vec<String>,

    /// List existing backup runs
    #[arg(long, conflicts_with_all = ["restore", "clean", "quick", "components"])]
    list: bool,

    /// Restore a component from an archive (path or file name)
    #[arg(long, value_name = "ARCHIVE", conflicts_with_all = ["clean", "quick", "components"])]
    restore: Option<PathBuf>,

    /// Skip the restore confirmation prompt
    #[arg(short, long, requires = "restore")]
    yes: bool,

    /// Remove backups older than DAYS (defaults to backup.retention_days)
    #[arg(long, value_name = "DAYS", num_args = 0..=1, conflicts_with_all = ["quick", "components"])]
    clean: Option<Option<u32>>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive components (the default when no command is given)
    Backup {
        /// Do not stop the service group (lower consistency)
        #[arg(long)]
        quick: bool,

        /// Back up only this component (repeatable)
        #[arg(long = "component", value_name = "NAME")]
        components: Vec<String>,
    },

    /// List backup runs, newest first
    List {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replace a component's data directory with an archive
    Restore {
        /// Archive path, or file name inside the backup directory
        archive: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete archives and manifests older than the retention threshold
    Clean {
        /// Age threshold in days (defaults to backup.retention_days)
        #[arg(long)]
        days: Option<u32>,

        /// Show what would be removed without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

impl Args {
    fn has_shortcut(&self) -> bool {
        self.quick
            || !self.components.is_empty()
            || self.list
            || self.restore.is_some()
            || self.clean.is_some()
    }

    /// The command to run, with the top-level shortcut flags folded in.
    fn resolve_command(&mut self) -> Result<Command> {
        if let Some(command) = self.command.take() {
            if self.has_shortcut() {
                bail!("shortcut flags cannot be combined with a subcommand");
            }
            return Ok(command);
        }
        if self.list {
            return Ok(Command::List { json: false });
        }
        if let Some(archive) = self.restore.take() {
            return Ok(Command::Restore {
                archive,
                yes: self.yes,
            });
        }
        if let Some(days) = self.clean {
            return Ok(Command::Clean {
                days,
                dry_run: false,
            });
        }
        Ok(Command::Backup {
            quick: self.quick,
            components: std::mem::take(&mut self.components),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();
    let command = args.resolve_command()?;

    // Load configuration
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!(
        "Starting stack-backup v{} (data: {}, backups: {})",
        env!("CARGO_PKG_VERSION"),
        config.storage.data_root.display(),
        config.storage.backup_dir.display()
    );

    let config = Arc::new(config);
    match command {
        Command::Backup { quick, components } => backup(config, quick, components).await,
        Command::List { json } => list(&config, json),
        Command::Restore { archive, yes } => restore(config, archive, yes).await,
        Command::Clean { days, dry_run } => clean(&config, days, dry_run),
    }
}

async fn backup(config: Arc<Config>, quick: bool, components: Vec<String>) -> Result<()> {
    let controller = DockerCompose::new(&config.controller);
    let executor = BackupExecutor::new(config, controller)?;
    let mode = if quick {
        println!("Quick backup: the service group keeps running, archives may be inconsistent.");
        ConsistencyMode::Quick
    } else {
        ConsistencyMode::Consistent
    };

    let report = executor.run(BackupRequest { components, mode }).await?;
    print_backup_report(&report);
    Ok(())
}

fn print_backup_report(report: &BackupReport) {
    println!();
    println!("Backup {} ({})", report.run_id, report.mode);
    println!("=======================");
    for archive in &report.archives {
        println!(
            "  ok      {:<12} {}  {} (source {}, {} files)",
            archive.component,
            archive.artifact.file_name,
            format_bytes(archive.artifact.size),
            format_bytes(archive.source.bytes),
            archive.source.files
        );
    }
    for failure in &report.failures {
        println!("  FAILED  {:<12} {}", failure.component, failure.error);
    }
    println!();
    println!("Manifest: {}", report.manifest_path.display());
    println!(
        "Total: {} archive(s), {} (source {}) in {:.1}s",
        report.archives.len(),
        format_bytes(report.total_archive_bytes()),
        format_bytes(report.total_source_bytes()),
        report.duration.as_secs_f64()
    );
    if !report.is_complete() {
        println!("{} component(s) failed, see above.", report.failures.len());
    }
}

fn list(config: &Config, json: bool) -> Result<()> {
    let listing = Catalog::new(config).list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if listing.is_empty() {
        println!("No backups found in {}", config.storage.backup_dir.display());
        return Ok(());
    }

    print_listing(&listing, config.backup.retention_days);
    Ok(())
}

fn print_listing(listing: &Listing, retention_days: u32) {
    let now = chrono::Local::now().naive_local();

    println!("Backup runs (newest first)");
    println!("==========================");
    for run in &listing.runs {
        let age = format_age((now - run.timestamp).num_seconds());
        let expired = if run.expired {
            format!("  [older than {} days]", retention_days)
        } else {
            String::new()
        };
        println!(
            "{}  {}  {:<10} {}  {} ago{}",
            run.run_id,
            run.timestamp.format("%Y-%m-%d %H:%M:%S"),
            run.mode,
            format_bytes(run.archive_bytes()),
            age,
            expired
        );
        for archive in &run.archives {
            let state = if archive.present { "" } else { "  (missing)" };
            println!(
                "    {}  {}{}",
                archive.file_name,
                format_bytes(archive.size),
                state
            );
        }
        for failure in &run.failures {
            println!("    failed: {}: {}", failure.component, failure.reason);
        }
    }

    if !listing.loose.is_empty() {
        println!();
        println!("Archives without a manifest");
        println!("===========================");
        for archive in &listing.loose {
            let marker = if archive.name.safety { "  [pre-restore]" } else { "" };
            let expired = if archive.expired { "  [expired]" } else { "" };
            println!(
                "  {}  {}{}{}",
                archive.file_name,
                format_bytes(archive.size),
                marker,
                expired
            );
        }
    }

    println!();
    println!("Total: {} run(s)", listing.runs.len());
}

async fn restore(config: Arc<Config>, archive: PathBuf, yes: bool) -> Result<()> {
    let controller = DockerCompose::new(&config.controller);
    let data_dir_of = |component: &str| config.component_dir(component);
    let executor = RestoreExecutor::new(config.clone(), controller)?;

    let (path, name) = executor.identify(&archive)?;
    let confirmed = yes
        || confirm(&format!(
            "Replace {} with the contents of {}?",
            data_dir_of(&name.component).display(),
            path.display()
        ))?;
    if !confirmed {
        return Err(BackupError::NotConfirmed(path).into());
    }

    let report = executor
        .run(RestoreRequest {
            archive: path,
            confirmed,
        })
        .await?;

    println!("Restored {} from {}", report.component, report.restored_from.display());
    match &report.safety_archive {
        Some(safety) => println!("Previous data saved to {}", safety.display()),
        None => println!("No previous data to save"),
    }
    if report.restarted {
        println!("Service group restarted");
    }
    Ok(())
}

/// Ask a yes/no question on stdin; anything but "y"/"yes" is a no.
fn confirm(question: &str) -> Result<bool> {
    print!("WARNING: this overwrites live data. {} [y/N] ", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn clean(config: &Config, days: Option<u32>, dry_run: bool) -> Result<()> {
    let days = days.unwrap_or(config.backup.retention_days);
    let sweeper = RetentionSweeper::new(config);
    let result = if dry_run {
        sweeper.preview(days)?
    } else {
        sweeper.clean(days)?
    };
    print_clean_result(&result, days);
    Ok(())
}

fn print_clean_result(result: &CleanResult, days: u32) {
    let verb = if result.dry_run { "Would remove" } else { "Removed" };
    for path in &result.removed {
        println!("  {}", path.display());
    }
    println!(
        "{} {} file(s) older than {} days, {} freed",
        verb,
        result.removed_count,
        days,
        format_bytes(result.bytes_freed)
    );
}
