//! Archive codec: one component directory <-> one compressed tar artifact.
//!
//! Artifacts are written to a temporary file in the destination directory and
//! renamed into place once the encoder is finished, so a final-named artifact
//! is always complete.

pub mod naming;

use crate::config::Config;
use crate::fs::walker::{tree_stats, TreeStats};
use crate::utils::errors::{BackupError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use tracing::debug;

/// Compression applied to the tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Zstd,
    None,
}

impl Compression {
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => ".tar.gz",
            Compression::Zstd => ".tar.zst",
            Compression::None => ".tar",
        }
    }

    /// Detect the scheme from an artifact file name
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        [Compression::Gzip, Compression::Zstd, Compression::None]
            .into_iter()
            .find(|c| file_name.ends_with(c.extension()))
    }
}

impl FromStr for Compression {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            "none" | "tar" => Ok(Compression::None),
            other => Err(BackupError::CompressionUnavailable(other.to_string())),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
            Compression::None => "none",
        })
    }
}

/// An artifact file as found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDescriptor {
    pub path: PathBuf,
    pub file_name: String,
    pub compression: Compression,
    pub size: u64,
}

impl ArtifactDescriptor {
    /// Describe an existing artifact, reading its size from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or_else(|| BackupError::InvalidArchiveName(path.display().to_string()))?
            .to_string();
        let compression = Compression::from_file_name(&file_name)
            .ok_or_else(|| BackupError::InvalidArchiveName(file_name.clone()))?;
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BackupError::ArchiveNotFound(path.to_path_buf()),
            _ => BackupError::io(path)(e),
        })?;
        if !metadata.is_file() {
            return Err(BackupError::ArchiveNotFound(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            compression,
            size: metadata.len(),
        })
    }
}

/// Result of a successful `pack`
#[derive(Debug, Clone)]
pub struct Packed {
    pub artifact: ArtifactDescriptor,
    /// Source directory size at pack time
    pub source: TreeStats,
}

/// What an archive holds, gathered without extracting it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveContents {
    /// Distinct top-level entries
    pub roots: BTreeSet<String>,
    pub entries: usize,
}

/// Packs and unpacks component directories with one configured scheme.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveCodec {
    compression: Compression,
    level: i32,
}

impl ArchiveCodec {
    pub fn new(compression: Compression, level: i32) -> Self {
        Self { compression, level }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.compression()?, config.backup.compression_level))
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Archive `source_dir` into `dest`.
    ///
    /// The archive holds a single top-level directory named like `source_dir`,
    /// so unpacking into the parent of `source_dir` recreates it in place.
    pub fn pack(&self, source_dir: &Path, dest: &Path) -> Result<Packed> {
        let root_name = source_dir
            .file_name()
            .ok_or_else(|| BackupError::Config(format!("cannot archive {}", source_dir.display())))?;

        if !source_dir.is_dir() {
            return Err(BackupError::SourceMissing {
                component: root_name.to_string_lossy().into_owned(),
                path: source_dir.to_path_buf(),
            });
        }

        let source = tree_stats(source_dir).map_err(BackupError::io(source_dir))?;

        let dest_dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dest_dir).map_err(BackupError::io(dest_dir))?;

        let mut tmp = NamedTempFile::new_in(dest_dir).map_err(BackupError::io(dest_dir))?;
        let tmp_path = tmp.path().to_path_buf();
        {
            let writer = BufWriter::new(tmp.as_file_mut());
            let mut writer = self
                .encode(writer, root_name, source_dir)
                .map_err(BackupError::io(source_dir))?;
            writer.flush().map_err(BackupError::io(&tmp_path))?;
        }
        tmp.as_file().sync_all().map_err(BackupError::io(&tmp_path))?;
        // Never replace an artifact that already carries this name
        tmp.persist_noclobber(dest)
            .map_err(|e| BackupError::io(dest)(e.error))?;

        let artifact = ArtifactDescriptor::from_path(dest)?;
        debug!(
            artifact = %artifact.file_name,
            files = source.files,
            source_bytes = source.bytes,
            size = artifact.size,
            "Packed directory"
        );

        Ok(Packed { artifact, source })
    }

    fn encode<W: Write>(&self, writer: W, root_name: &OsStr, source_dir: &Path) -> io::Result<W> {
        match self.compression {
            Compression::Gzip => {
                let level = flate2::Compression::new(self.level.clamp(0, 9) as u32);
                let encoder = flate2::write::GzEncoder::new(writer, level);
                append_tree(encoder, root_name, source_dir)?.finish()
            }
            Compression::Zstd => {
                let encoder = zstd::Encoder::new(writer, self.level.clamp(1, 22))?;
                append_tree(encoder, root_name, source_dir)?.finish()
            }
            Compression::None => append_tree(writer, root_name, source_dir),
        }
    }

    /// Extract `artifact` beneath `dest_parent`, preserving permissions,
    /// mtimes and, when running as root, owners.
    pub fn unpack(artifact: &Path, dest_parent: &Path) -> Result<()> {
        let mut archive = open_archive(artifact)?;
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);

        std::fs::create_dir_all(dest_parent).map_err(BackupError::io(dest_parent))?;
        archive.set_preserve_ownerships(
            can_restore_owners(dest_parent).map_err(BackupError::io(dest_parent))?,
        );
        archive
            .unpack(dest_parent)
            .map_err(|e| classify_read_error(artifact, e))
    }

    /// Read every entry of `artifact` to check it decodes end to end.
    pub fn verify(artifact: &Path) -> Result<ArchiveContents> {
        let mut archive = open_archive(artifact)?;
        let mut contents = ArchiveContents::default();

        let entries = archive
            .entries()
            .map_err(|e| classify_read_error(artifact, e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| classify_read_error(artifact, e))?;
            let path = entry
                .path()
                .map_err(|e| classify_read_error(artifact, e))?
                .into_owned();

            match path.components().next() {
                Some(Component::Normal(root)) => {
                    contents.roots.insert(root.to_string_lossy().into_owned());
                }
                _ => {
                    return Err(BackupError::CorruptArchive {
                        path: artifact.to_path_buf(),
                        reason: format!("unexpected entry path {}", path.display()),
                    })
                }
            }

            io::copy(&mut entry, &mut io::sink()).map_err(|e| classify_read_error(artifact, e))?;
            contents.entries += 1;
        }

        if contents.entries == 0 {
            return Err(BackupError::CorruptArchive {
                path: artifact.to_path_buf(),
                reason: "archive is empty".into(),
            });
        }
        Ok(contents)
    }
}

/// Only root may hand files to another user.
#[cfg(unix)]
fn can_restore_owners(dir: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    Ok(tempfile::tempfile_in(dir)?.metadata()?.uid() == 0)
}

#[cfg(not(unix))]
fn can_restore_owners(_dir: &Path) -> io::Result<bool> {
    Ok(false)
}

fn append_tree<W: Write>(writer: W, root_name: &OsStr, source_dir: &Path) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder.append_dir_all(root_name, source_dir)?;
    builder.into_inner()
}

fn open_archive(artifact: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let file_name = artifact
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or_default();
    let compression = Compression::from_file_name(file_name)
        .ok_or_else(|| BackupError::InvalidArchiveName(artifact.display().to_string()))?;

    let file = match File::open(artifact) {
        Ok(file) if artifact.is_file() => file,
        Ok(_) => return Err(BackupError::ArchiveNotFound(artifact.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(BackupError::ArchiveNotFound(artifact.to_path_buf()))
        }
        Err(e) => return Err(BackupError::io(artifact)(e)),
    };

    let reader = BufReader::new(file);
    let decoded: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        Compression::Zstd => Box::new(
            zstd::Decoder::with_buffer(reader).map_err(|e| classify_read_error(artifact, e))?,
        ),
        Compression::None => Box::new(reader),
    };
    Ok(tar::Archive::new(decoded))
}

/// Errors caused by the local filesystem stay I/O errors; anything else
/// raised while decoding means the artifact itself is bad.
fn classify_read_error(artifact: &Path, e: io::Error) -> BackupError {
    match e.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::AlreadyExists => BackupError::io(artifact)(e),
        _ => BackupError::CorruptArchive {
            path: artifact.to_path_buf(),
            reason: e.to_string(),
        },
    }
}
