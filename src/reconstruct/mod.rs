//! On-demand bundle reconstruction
//!
//! Plain-file bundles are served straight from their single blob. Archive
//! bundles are rebuilt as a fresh zip whose members appear with exactly the
//! recorded names and order.
//!
//! The zip writer is synchronous and needs a seekable sink, so assembly runs on
//! the blocking pool, writes into an anonymous temp file, and pulls each blob
//! through [`SyncIoBridge`]. A missing blob aborts the build before anything
//! is handed to the caller.

use crate::archive::ZipBundleWriter;
use crate::error::{AppError, Result};
use crate::models::{Bundle, BundleKind, Member};
use crate::storage::{BlobReader, BlobSource, MetadataRepository};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

pub const ARCHIVE_MEDIA_TYPE: &str = "application/zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Archive,
    File,
}

/// A bundle ready to be streamed to a client
pub struct ResolvedBundle {
    /// File name to present to the client
    pub download_name: String,
    pub media_type: String,
    pub kind: ContentKind,
    pub body: BlobReader,
}

impl std::fmt::Debug for ResolvedBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedBundle")
            .field("download_name", &self.download_name)
            .field("media_type", &self.media_type)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    /// No bundle is recorded under the requested name
    UnknownBundle,
    /// The bundle exists but references a blob the store does not have
    MissingBlob { digest: String },
}

#[derive(Debug)]
pub enum Resolution {
    Found(ResolvedBundle),
    NotFound(NotFoundReason),
}

pub struct ArchiveReconstructor {
    repository: Arc<dyn MetadataRepository>,
    source: Arc<dyn BlobSource>,
    spool_dir: Option<PathBuf>,
}

impl ArchiveReconstructor {
    /// `source` may be the local store or any remote [`BlobSource`]
    pub fn new(repository: Arc<dyn MetadataRepository>, source: Arc<dyn BlobSource>) -> Self {
        Self {
            repository,
            source,
            spool_dir: None,
        }
    }

    pub fn with_spool_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.spool_dir = dir;
        self
    }

    /// Look up a bundle and produce its byte stream.
    ///
    /// Unknown names and bundles with missing blobs are definitive
    /// [`Resolution::NotFound`] results. I/O and remote fetch failures are
    /// returned as errors.
    pub async fn resolve(&self, bundle_name: &str) -> Result<Resolution> {
        let Some(bundle) = self.repository.find_by_name(bundle_name).await? else {
            info!(bundle = %bundle_name, "Unknown bundle requested");
            return Ok(Resolution::NotFound(NotFoundReason::UnknownBundle));
        };

        let built = match bundle.kind() {
            BundleKind::Archive => self.assemble_archive(bundle).await,
            BundleKind::File => self.open_file(bundle).await,
        };

        match built {
            Ok(resolved) => {
                debug!(
                    bundle = %bundle_name,
                    media_type = %resolved.media_type,
                    "Bundle resolved"
                );
                Ok(Resolution::Found(resolved))
            }
            Err(AppError::InconsistentState { bundle, digest }) => {
                warn!(
                    bundle = %bundle,
                    hash = %digest,
                    "Inconsistent state: bundle references a missing blob"
                );
                Ok(Resolution::NotFound(NotFoundReason::MissingBlob { digest }))
            }
            Err(e) => Err(e),
        }
    }

    async fn open_file(&self, bundle: Bundle) -> Result<ResolvedBundle> {
        let [member] = bundle.members.as_slice() else {
            return Err(AppError::database_error(format!(
                "File bundle {} has {} members",
                bundle.name,
                bundle.members.len()
            )));
        };

        let body = self
            .source
            .open(&member.digest)
            .await
            .map_err(|e| missing_blob(e, &bundle.name, member))?;

        let media_type = mime_guess::from_path(&member.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(ResolvedBundle {
            download_name: member.name.clone(),
            media_type,
            kind: ContentKind::File,
            body,
        })
    }

    async fn assemble_archive(&self, bundle: Bundle) -> Result<ResolvedBundle> {
        let handle = Handle::current();
        let source = Arc::clone(&self.source);
        let spool_dir = self.spool_dir.clone();
        let download_name = bundle.name.clone();

        let file = tokio::task::spawn_blocking(move || -> Result<std::fs::File> {
            let mut writer = ZipBundleWriter::new(spool_dir.as_deref())?;

            for member in &bundle.members {
                if member.is_directory() {
                    writer.add_directory(&member.name)?;
                    continue;
                }

                let (reader, len) = handle
                    .block_on(source.open_with_len(&member.digest))
                    .map_err(|e| missing_blob(e, &bundle.name, member))?;
                let mut bridge = SyncIoBridge::new_with_handle(reader, handle.clone());
                writer.add_file(&member.name, &mut bridge, len)?;
            }

            debug!(bundle = %bundle.name, entries = writer.entries(), "Archive assembled");
            writer.finish()
        })
        .await
        .map_err(|e| AppError::Internal(format!("Archive assembly task failed: {}", e)))??;

        Ok(ResolvedBundle {
            download_name,
            media_type: ARCHIVE_MEDIA_TYPE.to_string(),
            kind: ContentKind::Archive,
            body: Box::pin(tokio::fs::File::from_std(file)),
        })
    }
}

/// A blob the metadata points at but the store cannot find
fn missing_blob(error: AppError, bundle_name: &str, member: &Member) -> AppError {
    if error.is_not_found() {
        AppError::InconsistentState {
            bundle: bundle_name.to_string(),
            digest: member.digest.to_string(),
        }
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestionPipeline;
    use crate::storage::{ContentAddressableStorage, ContentHasher, JsonSnapshotStore};
    use std::io::{Read, Write};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use zip::write::SimpleFileOptions;
    use zip::ZipArchive;

    struct Fixture {
        dir: TempDir,
        cas: Arc<ContentAddressableStorage>,
        pipeline: IngestionPipeline,
        reconstructor: ArchiveReconstructor,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        let cas = Arc::new(ContentAddressableStorage::new(data.clone()));
        let repository: Arc<dyn MetadataRepository> =
            Arc::new(JsonSnapshotStore::new(&data).unwrap());

        Fixture {
            pipeline: IngestionPipeline::new(cas.clone(), repository.clone()),
            reconstructor: ArchiveReconstructor::new(repository, cas.clone()),
            cas,
            dir,
        }
    }

    async fn body_bytes(resolved: ResolvedBundle) -> Vec<u8> {
        let mut body = resolved.body;
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).await.unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_archive_roundtrip_keeps_order() {
        let f = fixture();
        let path = f.dir.path().join("skins.zip");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        for (name, content) in [("z.txt", "zz"), ("a.txt", "aa"), ("m/", ""), ("m/x.txt", "zz")] {
            if name.ends_with('/') {
                zip.add_directory(name, SimpleFileOptions::default()).unwrap();
            } else {
                zip.start_file(name, SimpleFileOptions::default()).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
        f.pipeline.ingest_path(&path).await.unwrap();

        let Resolution::Found(resolved) = f.reconstructor.resolve("skins.zip").await.unwrap() else {
            panic!("expected skins.zip to resolve");
        };
        assert_eq!(resolved.kind, ContentKind::Archive);
        assert_eq!(resolved.media_type, ARCHIVE_MEDIA_TYPE);
        assert_eq!(resolved.download_name, "skins.zip");

        let bytes = body_bytes(resolved).await;
        let mut archive = ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut entries = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            entries.push((entry.name().to_string(), content));
        }
        assert_eq!(
            entries,
            vec![
                ("z.txt".to_string(), "zz".to_string()),
                ("a.txt".to_string(), "aa".to_string()),
                ("m/".to_string(), String::new()),
                ("m/x.txt".to_string(), "zz".to_string()),
            ]
        );
    }

    /// Reads through the local store without reporting blob lengths
    struct UnsizedSource(Arc<ContentAddressableStorage>);

    #[async_trait::async_trait]
    impl BlobSource for UnsizedSource {
        async fn open(&self, digest: &crate::storage::ContentDigest) -> Result<BlobReader> {
            self.0.open(digest).await
        }
    }

    #[tokio::test]
    async fn test_archive_from_source_without_lengths() {
        let f = fixture();
        let path = f.dir.path().join("pack.zip");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        zip.start_file("big.bin", SimpleFileOptions::default()).unwrap();
        zip.write_all(&vec![42u8; 100_000]).unwrap();
        zip.start_file("small.txt", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"small").unwrap();
        zip.finish().unwrap();
        f.pipeline.ingest_path(&path).await.unwrap();

        let repository: Arc<dyn MetadataRepository> =
            Arc::new(JsonSnapshotStore::new(&f.dir.path().join("data")).unwrap());
        let reconstructor =
            ArchiveReconstructor::new(repository, Arc::new(UnsizedSource(f.cas.clone())));

        let Resolution::Found(resolved) = reconstructor.resolve("pack.zip").await.unwrap() else {
            panic!("expected pack.zip to resolve");
        };
        let bytes = body_bytes(resolved).await;
        let mut archive = ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut big = Vec::new();
        archive.by_name("big.bin").unwrap().read_to_end(&mut big).unwrap();
        assert_eq!(big, vec![42u8; 100_000]);
        assert_eq!(archive.by_index(1).unwrap().name(), "small.txt");
    }

    #[tokio::test]
    async fn test_plain_file_media_type() {
        let f = fixture();
        let path = f.dir.path().join("logo.png");
        std::fs::write(&path, b"png bytes").unwrap();
        f.pipeline.ingest_path(&path).await.unwrap();

        let Resolution::Found(resolved) = f.reconstructor.resolve("logo.png").await.unwrap() else {
            panic!("expected logo.png to resolve");
        };
        assert_eq!(resolved.kind, ContentKind::File);
        assert_eq!(resolved.media_type, "image/png");
        assert_eq!(body_bytes(resolved).await, b"png bytes");
    }

    #[tokio::test]
    async fn test_unknown_extension_is_octet_stream() {
        let f = fixture();
        let path = f.dir.path().join("payload.qqq");
        std::fs::write(&path, b"opaque").unwrap();
        f.pipeline.ingest_path(&path).await.unwrap();

        let Resolution::Found(resolved) = f.reconstructor.resolve("payload.qqq").await.unwrap() else {
            panic!("expected payload.qqq to resolve");
        };
        assert_eq!(resolved.media_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_unknown_bundle() {
        let f = fixture();
        let resolution = f.reconstructor.resolve("unknown.zip").await.unwrap();
        assert!(matches!(
            resolution,
            Resolution::NotFound(NotFoundReason::UnknownBundle)
        ));
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let f = fixture();
        let path = f.dir.path().join("notes.txt");
        std::fs::write(&path, b"will vanish").unwrap();
        f.pipeline.ingest_path(&path).await.unwrap();

        let digest = ContentHasher::digest_bytes(b"will vanish");
        std::fs::remove_file(f.cas.get_object_path(&digest)).unwrap();

        let resolution = f.reconstructor.resolve("notes.txt").await.unwrap();
        assert!(matches!(
            resolution,
            Resolution::NotFound(NotFoundReason::MissingBlob { digest: d }) if d == digest.as_str()
        ));
    }
}
