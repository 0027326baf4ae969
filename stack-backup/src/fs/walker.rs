//! Directory traversal for component data directories.
//!
//! Used to size a component's source directory at run time.

use std::path::Path;
use walkdir::WalkDir;

/// Summary of a directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub files: usize,
    pub bytes: u64,
}

/// Count every non-directory entry beneath `root` and its total size.
/// Symlinks are counted but never followed, and contribute no bytes.
pub fn tree_stats(root: &Path) -> std::io::Result<TreeStats> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .try_fold(TreeStats::default(), |mut stats, entry| {
            let entry = entry?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                return Ok(stats);
            }
            stats.files += 1;
            if !file_type.is_symlink() {
                stats.bytes += entry.metadata()?.len();
            }
            Ok(stats)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        assert_eq!(tree_stats(temp_dir.path())?, TreeStats::default());
        Ok(())
    }

    #[test]
    fn test_tree_stats() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("wal"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"12345")?; // 5 bytes
        fs::write(temp_dir.path().join(".lock"), b"1234567")?; // 7 bytes
        fs::write(temp_dir.path().join("wal/00001"), b"abc")?; // 3 bytes

        let stats = tree_stats(temp_dir.path())?;
        assert_eq!(stats, TreeStats { files: 3, bytes: 15 });

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_not_followed() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("target"), b"0123456789")?;
        std::os::unix::fs::symlink("target", temp_dir.path().join("link"))?;

        assert_eq!(tree_stats(temp_dir.path())?, TreeStats { files: 2, bytes: 10 });

        Ok(())
    }
}
