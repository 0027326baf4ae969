//! Utility modules shared by the orchestrators.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{BackupError, Result};
