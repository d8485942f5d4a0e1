//! Content-Addressable Storage (CAS) Implementation
//!
//! Based on Git's object storage model, this module provides:
//! - SHA-256 content addressing
//! - Three-level sharded directory structure (bounded fan-out)
//! - Write-once semantics with atomic publish (no partial-write visibility)
//! - Object existence cache for performance optimization
//!
//! ## Storage Layout
//!
//! ```text
//! <root>/
//!   objects/
//!     a/
//!       3/
//!         f/
//!           a3f2e1d4c5b6a7... (full digest as filename)
//!   tmp/
//!     .blob-XXXXXX         (in-flight writes, same filesystem as objects/)
//! ```
//!
//! A blob becomes visible only through a no-clobber rename of a fully written
//! and verified temp file, so anything `exists` reports is complete.

use crate::error::{AppError, Result};
use crate::storage::hasher::ContentHasher;
use crate::storage::traits::{BlobReader, BlobSource, BlobStore, PutOutcome};
use crate::storage::ContentDigest;
use async_trait::async_trait;
use dashmap::DashSet;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const COPY_BUFFER_SIZE: usize = 64 * 1024; // 64KB buffer for efficient copying

/// Content-Addressable Storage manager
///
/// All blobs live under `root/objects/`; writes are staged in `root/tmp/`.
///
/// ## Performance Optimization
///
/// Uses an in-memory DashSet for object existence checks to avoid redundant
/// filesystem operations. This store never deletes blobs, but a blob removed
/// out-of-band stays cached as present for `exists`; `put` always checks the
/// filesystem and rewrites such a blob.
#[derive(Debug, Clone)]
pub struct ContentAddressableStorage {
    objects_dir: PathBuf,
    staging_dir: PathBuf,
    existence_cache: Arc<DashSet<ContentDigest>>,
    extension_fallback: bool,
}

impl ContentAddressableStorage {
    /// Create a new CAS instance rooted at `root`
    ///
    /// Directories are created lazily on first write.
    ///
    /// ```no_run
    /// use std::path::PathBuf;
    /// use bundle_vault::storage::ContentAddressableStorage;
    ///
    /// let cas = ContentAddressableStorage::new(PathBuf::from("./data"));
    /// ```
    pub fn new(root: PathBuf) -> Self {
        Self {
            objects_dir: root.join("objects"),
            staging_dir: root.join("tmp"),
            existence_cache: Arc::new(DashSet::new()),
            extension_fallback: false,
        }
    }

    /// Accept `<digest>.<ext>` leaves written by stores that kept the
    /// member's extension. Off by default: each canonical miss then lists
    /// the leaf shard.
    pub fn with_extension_fallback(mut self, enabled: bool) -> Self {
        self.extension_fallback = enabled;
        self
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Canonical filesystem path for a digest: `objects/a/3/f/a3f...`
    pub fn get_object_path(&self, digest: &ContentDigest) -> PathBuf {
        self.objects_dir.join(digest.shard_path())
    }

    /// Find the stored file for a digest.
    ///
    /// Only the canonical leaf is checked unless the extension fallback is
    /// enabled, in which case `<digest>.<ext>` leaves are found by scanning
    /// the leaf shard.
    async fn locate(&self, digest: &ContentDigest) -> Result<Option<PathBuf>> {
        let canonical = self.get_object_path(digest);
        let present = fs::try_exists(&canonical).await.map_err(|e| {
            AppError::io_error(
                format!("Failed to stat object: {}", e),
                Some(canonical.clone()),
            )
        })?;
        if present {
            return Ok(Some(canonical));
        }
        if !self.extension_fallback {
            return Ok(None);
        }

        let Some(shard_dir) = canonical.parent() else {
            return Ok(None);
        };
        let mut entries = match fs::read_dir(shard_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::io_error(
                    format!("Failed to list shard directory: {}", e),
                    Some(shard_dir.to_path_buf()),
                ))
            }
        };

        let prefix = format!("{}.", digest);
        while let Some(entry) = entries.next_entry().await? {
            let matches = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix));
            if matches {
                return Ok(Some(entry.path()));
            }
        }

        Ok(None)
    }

    /// Store an in-memory buffer and return its digest
    pub async fn store_bytes(&self, content: &[u8]) -> Result<ContentDigest> {
        let digest = ContentHasher::digest_bytes(content);
        let reader: BlobReader = Box::pin(std::io::Cursor::new(content.to_vec()));
        self.put(&digest, reader, "").await?;
        Ok(digest)
    }

    /// Verify blob integrity by recomputing its digest
    ///
    /// Returns `false` when the stored bytes no longer hash to `digest`.
    pub async fn verify_integrity(&self, digest: &ContentDigest) -> Result<bool> {
        let reader = self.open(digest).await?;
        let computed = ContentHasher::digest_reader(reader).await?;
        Ok(computed == *digest)
    }

    async fn ensure_dir(path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(|e| {
            AppError::io_error(
                format!("Failed to create directory: {}", e),
                Some(path.to_path_buf()),
            )
        })
    }
}

#[async_trait]
impl BlobSource for ContentAddressableStorage {
    async fn open(&self, digest: &ContentDigest) -> Result<BlobReader> {
        let (reader, _) = self.open_with_len(digest).await?;
        Ok(reader)
    }

    async fn open_with_len(&self, digest: &ContentDigest) -> Result<(BlobReader, Option<u64>)> {
        let Some(path) = self.locate(digest).await? else {
            return Err(AppError::not_found(format!("blob {}", digest)));
        };

        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                AppError::not_found(format!("blob {}", digest))
            } else {
                AppError::io_error(format!("Failed to open object: {}", e), Some(path.clone()))
            }
        })?;
        let len = file.metadata().await?.len();

        Ok((Box::pin(file), Some(len)))
    }
}

#[async_trait]
impl BlobStore for ContentAddressableStorage {
    async fn exists(&self, digest: &ContentDigest) -> Result<bool> {
        if self.existence_cache.contains(digest) {
            return Ok(true);
        }
        let found = self.locate(digest).await?.is_some();
        if found {
            self.existence_cache.insert(digest.clone());
        }
        Ok(found)
    }

    async fn put(
        &self,
        digest: &ContentDigest,
        mut reader: BlobReader,
        hint_name: &str,
    ) -> Result<PutOutcome> {
        if self.locate(digest).await?.is_some() {
            self.existence_cache.insert(digest.clone());
            debug!(
                hash = %digest,
                member = %hint_name,
                "Content already exists, skipping write (deduplication)"
            );
            return Ok(PutOutcome::AlreadyPresent);
        }
        self.existence_cache.remove(digest);

        let object_path = self.get_object_path(digest);
        Self::ensure_dir(&self.staging_dir).await?;
        if let Some(parent) = object_path.parent() {
            Self::ensure_dir(parent).await?;
        }

        let staged = tempfile::Builder::new()
            .prefix(".blob-")
            .tempfile_in(&self.staging_dir)
            .map_err(|e| {
                AppError::io_error(
                    format!("Failed to create staging file: {}", e),
                    Some(self.staging_dir.clone()),
                )
            })?;
        let staged_path = staged.path().to_path_buf();
        let handle = staged.as_file().try_clone().map_err(|e| {
            AppError::io_error(
                format!("Failed to open staging file: {}", e),
                Some(staged_path.clone()),
            )
        })?;
        let mut out = fs::File::from_std(handle);

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut total_bytes = 0u64;

        loop {
            let bytes_read = reader.read(&mut buffer).await?;
            if bytes_read == 0 {
                break; // EOF
            }
            hasher.update(&buffer[..bytes_read]);
            out.write_all(&buffer[..bytes_read]).await.map_err(|e| {
                AppError::io_error(
                    format!("Failed to write staging file: {}", e),
                    Some(staged_path.clone()),
                )
            })?;
            total_bytes += bytes_read as u64;
        }

        out.flush().await?;
        out.sync_all().await.map_err(|e| {
            AppError::io_error(
                format!("Failed to sync staging file: {}", e),
                Some(staged_path.clone()),
            )
        })?;
        drop(out);

        // The staged file is removed on drop if we bail out here.
        let actual = ContentHasher::finalize(hasher);
        if actual != *digest {
            warn!(
                expected = %digest,
                actual = %actual,
                member = %hint_name,
                "Stream content does not match declared digest, discarding"
            );
            return Err(AppError::Integrity {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            staged
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }

        match staged.persist_noclobber(&object_path) {
            Ok(_) => {}
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                // Another writer published the same digest first - deduplication win
                self.existence_cache.insert(digest.clone());
                debug!(
                    hash = %digest,
                    "Content already exists (concurrent write detected), skipping"
                );
                return Ok(PutOutcome::AlreadyPresent);
            }
            Err(e) => {
                return Err(AppError::io_error(
                    format!("Failed to publish object: {}", e.error),
                    Some(object_path),
                ));
            }
        }

        self.existence_cache.insert(digest.clone());

        info!(
            hash = %digest,
            size = total_bytes,
            member = %hint_name,
            path = %object_path.display(),
            "Stored blob in CAS"
        );

        Ok(PutOutcome::Stored { bytes: total_bytes })
    }
}
