//! Stack Backup Library
//!
//! Backup, restore and retention for the data directories of a container
//! service group, with optional stop/start coordination for consistent
//! snapshots.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod executor;
pub mod fs;
pub mod lifecycle;
pub mod restore;
pub mod retention;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{BackupError, Result};
