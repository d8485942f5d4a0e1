//! Shared fixtures for integration tests
#![allow(dead_code)]

use bundle_vault::config::{MetadataBackend, StorageConfig};
use bundle_vault::ingest::IngestionPipeline;
use bundle_vault::reconstruct::{ArchiveReconstructor, ResolvedBundle};
use bundle_vault::storage::{
    open_repository, BlobSource, ContentAddressableStorage, MetadataRepository,
};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive};

/// Temporary data directory with a local blob store and metadata repository
pub struct Workspace {
    pub dir: TempDir,
    pub inputs: PathBuf,
    pub data: PathBuf,
    pub cas: Arc<ContentAddressableStorage>,
    pub repository: Arc<dyn MetadataRepository>,
}

impl Workspace {
    pub async fn new(backend: MetadataBackend) -> Self {
        let dir = TempDir::new().unwrap();
        let inputs = dir.path().join("repofiles");
        let data = dir.path().join("data");
        std::fs::create_dir_all(&inputs).unwrap();

        let storage = StorageConfig {
            data_dir: data.clone(),
            metadata_backend: backend,
            spool_dir: None,
            extension_fallback: false,
        };
        let repository = open_repository(&storage).await.unwrap();
        let cas = Arc::new(ContentAddressableStorage::new(data.clone()));

        Self {
            dir,
            inputs,
            data,
            cas,
            repository,
        }
    }

    pub fn pipeline(&self) -> IngestionPipeline {
        IngestionPipeline::new(self.cas.clone(), self.repository.clone())
    }

    pub fn reconstructor(&self) -> ArchiveReconstructor {
        ArchiveReconstructor::new(self.repository.clone(), self.cas.clone())
    }

    pub fn reconstructor_with(&self, source: Arc<dyn BlobSource>) -> ArchiveReconstructor {
        ArchiveReconstructor::new(self.repository.clone(), source)
    }

    pub fn write_input(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.inputs.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn write_zip(&self, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = self.inputs.join(name);
        write_zip(&path, entries, CompressionMethod::Deflated);
        path
    }

    /// Number of blob files under `objects/`
    pub fn blob_count(&self) -> usize {
        let objects = self.cas.objects_dir();
        if !objects.exists() {
            return 0;
        }
        WalkDir::new(objects)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .count()
    }
}

/// Build a zip; names ending in `/` become directory entries
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])], method: CompressionMethod) {
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    let options = SimpleFileOptions::default().compression_method(method);
    for (name, content) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content).unwrap();
        }
    }
    zip.finish().unwrap();
}

/// Entries of an in-memory zip, in central directory order
pub fn zip_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            (entry.name().to_string(), content)
        })
        .collect()
}

pub async fn read_body(resolved: ResolvedBundle) -> Vec<u8> {
    let mut body = resolved.body;
    let mut bytes = Vec::new();
    body.read_to_end(&mut bytes).await.unwrap();
    bytes
}
