//! Ingestion pipeline
//!
//! Turns input files into bundles. Plain files become one-member bundles;
//! zip containers become one member per entry, in archive order. Content is
//! written to the blob store only when its digest is new.
//!
//! A bundle record is inserted only after every member was stored, so an
//! abandoned archive leaves at most some orphan blobs behind and never a
//! half-listed bundle.

use crate::archive::ZipBundleReader;
use crate::error::{AppError, Result};
use crate::models::{Bundle, BundleKind, Member};
use crate::storage::{
    BlobReader, BlobStore, ContentDigest, ContentHasher, MetadataRepository, PutOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Summary of a bundle written by this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub bundle_name: String,
    pub kind: BundleKind,
    pub members: usize,
    /// Blobs newly published by this ingest
    pub blobs_written: usize,
    /// Members whose content was already stored
    pub blobs_reused: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(IngestReport),
    /// A bundle with this name already exists; nothing was changed
    AlreadyStored { bundle_name: String },
}

/// Result of a batch run. Every input lands in exactly one list.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub stored: Vec<IngestReport>,
    pub skipped: Vec<String>,
    pub failed: Vec<(PathBuf, AppError)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.stored.len() + self.skipped.len() + self.failed.len()
    }
}

#[derive(Debug, Default)]
struct BlobTally {
    written: usize,
    reused: usize,
}

pub struct IngestionPipeline {
    blobs: Arc<dyn BlobStore>,
    repository: Arc<dyn MetadataRepository>,
    spool_dir: Option<PathBuf>,
}

impl IngestionPipeline {
    pub fn new(blobs: Arc<dyn BlobStore>, repository: Arc<dyn MetadataRepository>) -> Self {
        Self {
            blobs,
            repository,
            spool_dir: None,
        }
    }

    /// Spool decompressed archive entries under `dir` instead of the system temp dir
    pub fn with_spool_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.spool_dir = dir;
        self
    }

    /// Ingest one input file.
    ///
    /// The bundle name is the file name. An existing bundle of the same name
    /// is left untouched and reported as [`IngestOutcome::AlreadyStored`].
    ///
    /// # Errors
    ///
    /// - `CorruptArchive` if a zip input or one of its entries is unreadable
    /// - I/O or metadata errors; no bundle record is written in either case
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestOutcome> {
        let bundle_name = bundle_name_of(path)?;

        if self.repository.exists_by_name(&bundle_name).await? {
            info!(bundle = %bundle_name, "Bundle already stored, skipping");
            return Ok(IngestOutcome::AlreadyStored { bundle_name });
        }

        let kind = BundleKind::of(&bundle_name);
        let mut tally = BlobTally::default();
        let members = match kind {
            BundleKind::File => vec![self.absorb_file(path, &bundle_name, &mut tally).await?],
            BundleKind::Archive => self
                .absorb_archive(path, &mut tally)
                .await
                .map_err(|e| e.with_context(bundle_name.as_str()))?,
        };

        let bundle = Bundle::new(bundle_name.clone(), members);
        match self.repository.insert(&bundle).await {
            Ok(()) => {}
            Err(AppError::Duplicate(_)) => {
                // Another ingester recorded the same name after our existence check
                info!(bundle = %bundle_name, "Bundle already stored, skipping");
                return Ok(IngestOutcome::AlreadyStored { bundle_name });
            }
            Err(e) => return Err(e),
        }

        let report = IngestReport {
            bundle_name,
            kind,
            members: bundle.members.len(),
            blobs_written: tally.written,
            blobs_reused: tally.reused,
        };
        info!(
            bundle = %report.bundle_name,
            kind = %report.kind,
            members = report.members,
            blobs_written = report.blobs_written,
            blobs_reused = report.blobs_reused,
            "Bundle stored"
        );

        Ok(IngestOutcome::Stored(report))
    }

    /// Ingest inputs one after another. A failing input never stops the batch.
    pub async fn ingest_batch(&self, paths: &[PathBuf]) -> BatchReport {
        let mut report = BatchReport::default();

        for path in paths {
            match self.ingest_path(path).await {
                Ok(IngestOutcome::Stored(stored)) => report.stored.push(stored),
                Ok(IngestOutcome::AlreadyStored { bundle_name }) => report.skipped.push(bundle_name),
                Err(e) => {
                    if matches!(e, AppError::CorruptArchive { .. }) {
                        warn!(path = %path.display(), error = %e, "Corrupt archive, input abandoned");
                    } else {
                        error!(path = %path.display(), error = %e, "Failed to ingest input");
                    }
                    report.failed.push((path.clone(), e));
                }
            }
        }

        info!(
            stored = report.stored.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Batch ingestion finished"
        );
        report
    }

    async fn absorb_file(
        &self,
        path: &Path,
        member_name: &str,
        tally: &mut BlobTally,
    ) -> Result<Member> {
        let open = || -> Result<BlobReader> {
            let file = std::fs::File::open(path).map_err(|e| {
                AppError::io_error(format!("Failed to open input: {}", e), Some(path.to_path_buf()))
            })?;
            Ok(Box::pin(tokio::fs::File::from_std(file)))
        };

        let digest = self.absorb(member_name, open, tally).await?;
        Ok(Member::new(member_name, digest))
    }

    async fn absorb_archive(&self, path: &Path, tally: &mut BlobTally) -> Result<Vec<Member>> {
        let mut reader = ZipBundleReader::open(path, self.spool_dir.as_deref()).await?;
        let mut members = Vec::with_capacity(reader.len());

        while let Some(entry) = reader.next_entry().await {
            let entry = entry?;
            let digest = self.absorb(&entry.name, || entry.open(), tally).await?;
            members.push(Member::new(entry.name.clone(), digest));
        }

        debug!(path = %path.display(), members = members.len(), "Archive entries absorbed");
        Ok(members)
    }

    /// Hash content, then store it unless a blob with that digest exists.
    ///
    /// `open` is called once for hashing and once for `put`, which checks the
    /// store itself and leaves the second reader unread on a dedup hit.
    async fn absorb<F>(&self, member_name: &str, open: F, tally: &mut BlobTally) -> Result<ContentDigest>
    where
        F: Fn() -> Result<BlobReader>,
    {
        let digest = ContentHasher::digest_reader(open()?).await?;

        match self.blobs.put(&digest, open()?, member_name).await? {
            PutOutcome::Stored { bytes } => {
                debug!(hash = %digest, member = %member_name, size = bytes, "New blob stored");
                tally.written += 1;
            }
            PutOutcome::AlreadyPresent => {
                debug!(hash = %digest, member = %member_name, "Deduplication hit, blob already stored");
                tally.reused += 1;
            }
        }

        Ok(digest)
    }
}

fn bundle_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| AppError::InvalidPath(format!("No usable file name: {}", path.display())))
}

/// Regular files directly inside `dir`, sorted by name
pub fn discover_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            AppError::io_error(
                format!("Failed to scan input directory: {}", e),
                Some(dir.to_path_buf()),
            )
        })?;
        if entry.file_type().is_file() {
            inputs.push(entry.into_path());
        }
    }

    debug!(dir = %dir.display(), inputs = inputs.len(), "Discovered ingestion inputs");
    Ok(inputs)
}
