//! Fixtures shared by the unit tests.

use crate::lifecycle::ContainerController;
use crate::utils::errors::{BackupError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// Create `root` and the given files beneath it.
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    fs::create_dir_all(root).unwrap();
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// Entry kind, content and permission bits of every path beneath `root`.
pub fn tree_snapshot(root: &Path) -> Vec<(PathBuf, String, Vec<u8>, u32)> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
        let meta = fs::symlink_metadata(entry.path()).unwrap();

        let (kind, content) = if meta.file_type().is_symlink() {
            let target = fs::read_link(entry.path()).unwrap();
            ("symlink", target.to_string_lossy().into_owned().into_bytes())
        } else if meta.is_dir() {
            ("dir", Vec::new())
        } else {
            ("file", fs::read(entry.path()).unwrap())
        };

        entries.push((rel, kind.to_string(), content, mode_of(&meta)));
    }
    entries
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if meta.file_type().is_symlink() {
        0
    } else {
        meta.permissions().mode() & 0o7777
    }
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    u32::from(meta.permissions().readonly())
}

/// Push a file's modification time `days` into the past.
pub fn age_file(path: &Path, days: u64) {
    let when = SystemTime::now() - Duration::from_secs(days * 86_400);
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(when)
        .unwrap();
}

/// In-memory stand-in for the container runtime.
pub struct FakeController {
    up: AtomicBool,
    fail_query: AtomicBool,
    fail_stop: AtomicBool,
    fail_start: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeController {
    fn with_state(up: bool) -> Self {
        Self {
            up: AtomicBool::new(up),
            fail_query: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn running() -> Self {
        Self::with_state(true)
    }

    pub fn stopped() -> Self {
        Self::with_state(false)
    }

    pub fn fail_query(&self) {
        self.fail_query.store(true, Ordering::SeqCst);
    }

    pub fn fail_stop(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str, fail: &AtomicBool) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if fail.load(Ordering::SeqCst) {
            return Err(BackupError::ControllerUnavailable(format!("fake {} failure", call)));
        }
        Ok(())
    }
}

impl ContainerController for FakeController {
    fn group(&self) -> &str {
        "fake-stack"
    }

    async fn is_running(&self) -> Result<bool> {
        self.record("is_running", &self.fail_query)?;
        Ok(self.is_up())
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop", &self.fail_stop)?;
        self.up.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.record("start", &self.fail_start)?;
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }
}
