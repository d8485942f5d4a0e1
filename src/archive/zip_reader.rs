//! Lazy zip member reader
//!
//! The `zip` crate is synchronous, so every archive access runs on the
//! blocking pool. Each entry is decompressed exactly once into a spool file;
//! callers then hash and store it from that spool without holding the whole
//! entry in memory.

use crate::archive::map_zip_error;
use crate::error::{AppError, Result};
use crate::storage::BlobReader;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use zip::ZipArchive;

const SPOOL_BUFFER_SIZE: usize = 64 * 1024;

/// One decompressed archive member
#[derive(Debug)]
pub struct ArchiveEntry {
    pub name: String,
    /// The zip crate's view: name ends in `/` or `\`
    pub is_dir: bool,
    spool: NamedTempFile,
}

impl ArchiveEntry {
    /// Open the entry content from the start. May be called more than once.
    pub fn open(&self) -> Result<BlobReader> {
        let file = self.spool.reopen().map_err(|e| {
            AppError::io_error(
                format!("Failed to reopen spooled entry {}: {}", self.name, e),
                Some(self.spool.path().to_path_buf()),
            )
        })?;
        Ok(Box::pin(tokio::fs::File::from_std(file)))
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.spool.as_file().metadata()?.len())
    }
}

/// Reads the members of a zip container in their native order.
///
/// The zip crate indexes the central directory by name, so entries that
/// share a name collapse into a single member.
pub struct ZipBundleReader {
    path: PathBuf,
    spool_dir: Option<PathBuf>,
    archive: Option<ZipArchive<File>>,
    next_index: usize,
    len: usize,
}

impl ZipBundleReader {
    /// Open a zip container.
    ///
    /// # Errors
    ///
    /// `CorruptArchive` if the file is not a readable zip container.
    pub async fn open(path: &Path, spool_dir: Option<&Path>) -> Result<Self> {
        let archive_path = path.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || {
            let file = File::open(&archive_path).map_err(|e| {
                AppError::io_error(
                    format!("Failed to open archive: {}", e),
                    Some(archive_path.clone()),
                )
            })?;
            ZipArchive::new(file).map_err(|e| {
                AppError::archive_error(
                    format!("Failed to open ZIP archive: {}", e),
                    Some(archive_path.clone()),
                )
            })
        })
        .await
        .map_err(|e| AppError::Internal(format!("Archive open task failed: {}", e)))??;

        let len = archive.len();
        debug!(path = %path.display(), entries = len, "Opened zip archive");

        Ok(Self {
            path: path.to_path_buf(),
            spool_dir: spool_dir.map(Path::to_path_buf),
            archive: Some(archive),
            next_index: 0,
            len,
        })
    }

    /// Number of entries in the central directory
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decompress the next entry, or `None` once every entry was yielded.
    ///
    /// After an error the remaining entries can still be requested, but
    /// ingestion treats any entry failure as fatal for the whole archive.
    pub async fn next_entry(&mut self) -> Option<Result<ArchiveEntry>> {
        if self.next_index >= self.len {
            return None;
        }
        let mut archive = self.archive.take()?;
        let index = self.next_index;
        self.next_index += 1;

        let path = self.path.clone();
        let spool_dir = self.spool_dir.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = spool_entry(&mut archive, index, &path, spool_dir.as_deref());
            (archive, result)
        })
        .await;

        match joined {
            Ok((archive, result)) => {
                self.archive = Some(archive);
                Some(result)
            }
            Err(e) => {
                self.next_index = self.len;
                Some(Err(AppError::Internal(format!(
                    "Archive read task failed: {}",
                    e
                ))))
            }
        }
    }
}

fn spool_entry(
    archive: &mut ZipArchive<File>,
    index: usize,
    path: &Path,
    spool_dir: Option<&Path>,
) -> Result<ArchiveEntry> {
    let mut entry = archive.by_index(index).map_err(|e| {
        map_zip_error(e, &format!("Failed to access entry {}", index), Some(path))
    })?;
    let name = entry.name().to_string();
    let is_dir = entry.is_dir();

    let spool = match spool_dir {
        Some(dir) => tempfile::Builder::new().prefix(".entry-").tempfile_in(dir),
        None => NamedTempFile::new(),
    }
    .map_err(|e| AppError::io_error(format!("Failed to create spool file: {}", e), None))?;

    // Directory-style names can still carry bytes, so every entry is copied
    let mut out = spool.as_file();
    let mut buffer = vec![0u8; SPOOL_BUFFER_SIZE];
    loop {
        // Read failures (bad CRC, truncated data) belong to the archive
        let bytes_read = entry.read(&mut buffer).map_err(|e| {
            AppError::archive_error(
                format!("Failed to read entry {}: {}", name, e),
                Some(path.to_path_buf()),
            )
        })?;
        if bytes_read == 0 {
            break;
        }
        out.write_all(&buffer[..bytes_read]).map_err(|e| {
            AppError::io_error(
                format!("Failed to spool entry {}: {}", name, e),
                Some(spool.path().to_path_buf()),
            )
        })?;
    }
    out.flush()?;

    Ok(ArchiveEntry {
        name,
        is_dir,
        spool,
    })
}
