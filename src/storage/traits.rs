use crate::error::Result;
use crate::models::Bundle;
use crate::storage::ContentDigest;
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Single-pass byte stream of one blob
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Result of a [`BlobStore::put`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The blob was written and published by this call
    Stored { bytes: u64 },
    /// A blob with this digest was already visible; nothing was written
    AlreadyPresent,
}

/// Read access to blobs by digest.
///
/// Implemented by the local store and by remote fetchers, so the read path
/// never depends on where blobs physically live.
#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Open a blob for reading. Absent blobs yield `AppError::NotFound`.
    async fn open(&self, digest: &ContentDigest) -> Result<BlobReader>;

    /// Open a blob along with its length, when the source knows it up front
    async fn open_with_len(&self, digest: &ContentDigest) -> Result<(BlobReader, Option<u64>)> {
        Ok((self.open(digest).await?, None))
    }
}

/// Write-once, read-many blob persistence keyed by digest.
#[async_trait]
pub trait BlobStore: BlobSource {
    async fn exists(&self, digest: &ContentDigest) -> Result<bool>;

    /// Store `reader` under `digest` unless already present.
    ///
    /// `hint_name` is the member name the content arrived under; it never
    /// participates in the blob's identity. Calling `put` for a digest that
    /// already exists is a no-op, including when another writer publishes the
    /// same digest concurrently.
    async fn put(
        &self,
        digest: &ContentDigest,
        reader: BlobReader,
        hint_name: &str,
    ) -> Result<PutOutcome>;
}

/// Bundle index: bundle name -> ordered members.
///
/// Bundle names are unique. Implementations must reject a second insert of
/// the same name with `AppError::Duplicate` and must return members in the
/// order they were inserted.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    async fn exists_by_name(&self, bundle_name: &str) -> Result<bool>;

    async fn insert(&self, bundle: &Bundle) -> Result<()>;

    async fn find_by_name(&self, bundle_name: &str) -> Result<Option<Bundle>>;

    /// Release the backing store. The repository must not be used afterwards.
    async fn close(&self) {}
}
