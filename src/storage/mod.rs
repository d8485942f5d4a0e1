//! Content-Addressable Storage (CAS) Module
//!
//! Blobs are identified by the SHA-256 of their bytes and stored once no
//! matter how many bundles reference them. Bundle metadata (name -> ordered
//! members) lives in a separate repository.
//!
//! ## Architecture
//!
//! ```text
//! data/
//! ├── metadata.db          # SQLite metadata (or bundles.json)
//! ├── tmp/                 # Publish staging
//! └── objects/             # Content storage (sharded)
//!     ├── a/3/f/
//!     │   └── a3f2e1d4c5...  # full SHA-256 as leaf name
//!     └── b/7/e/
//!         └── b7e145a3b2...
//! ```

pub mod cas;
pub mod hasher;
pub mod metadata_store;
pub mod remote;
pub mod snapshot_store;
pub mod traits;

use crate::config::{MetadataBackend, StorageConfig};
use crate::error::Result;
use std::sync::Arc;

pub use cas::ContentAddressableStorage;
pub use hasher::{ContentDigest, ContentHasher, EMPTY_CONTENT_DIGEST};
pub use metadata_store::SqliteMetadataStore;
pub use remote::RemoteBlobSource;
pub use snapshot_store::JsonSnapshotStore;
pub use traits::{BlobReader, BlobSource, BlobStore, MetadataRepository, PutOutcome};

/// Open the metadata repository selected by `config.metadata_backend`
pub async fn open_repository(config: &StorageConfig) -> Result<Arc<dyn MetadataRepository>> {
    let repository: Arc<dyn MetadataRepository> = match config.metadata_backend {
        MetadataBackend::Sqlite => Arc::new(SqliteMetadataStore::new(&config.data_dir).await?),
        MetadataBackend::Json => Arc::new(JsonSnapshotStore::new(&config.data_dir)?),
    };
    Ok(repository)
}
