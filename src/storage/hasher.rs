//! Content hashing
//!
//! SHA-256 digests rendered as 64 lowercase hexadecimal characters. A digest is
//! the sole identity of a blob and also names its location in the sharded
//! object layout, so parsing rejects anything that is not pure lowercase hex.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Number of one-character shard levels above each blob leaf
pub const SHARD_DEPTH: usize = 3;

/// SHA-256 of zero bytes
pub const EMPTY_CONTENT_DIGEST: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const BUFFER_SIZE: usize = 8 * 1024; // 8KB buffer

/// Validated content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let well_formed = value.len() == DIGEST_HEX_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));

        if well_formed {
            Ok(Self(value))
        } else {
            Err(AppError::InvalidDigest(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this digest names zero-length content
    pub fn is_empty_content(&self) -> bool {
        self.0 == EMPTY_CONTENT_DIGEST
    }

    /// Relative location of the blob: `a/b/c/abc123...`
    pub fn shard_path(&self) -> PathBuf {
        let mut path = PathBuf::new();
        for shard in self.shards() {
            path.push(shard);
        }
        path.push(&self.0);
        path
    }

    /// Same location as [`shard_path`](Self::shard_path), always `/`-separated,
    /// for use as a remote object key.
    pub fn shard_key(&self) -> String {
        let mut key = String::with_capacity(SHARD_DEPTH * 2 + DIGEST_HEX_LEN);
        for shard in self.shards() {
            key.push_str(shard);
            key.push('/');
        }
        key.push_str(&self.0);
        key
    }

    fn shards(&self) -> impl Iterator<Item = &str> {
        (0..SHARD_DEPTH).map(move |i| &self.0[i..i + 1])
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

/// Stateless SHA-256 hasher
pub struct ContentHasher;

impl ContentHasher {
    /// Compute the digest of an in-memory buffer
    ///
    /// ```
    /// use bundle_vault::storage::ContentHasher;
    ///
    /// let digest = ContentHasher::digest_bytes(b"hello world");
    /// assert_eq!(digest.as_str().len(), 64);
    /// ```
    pub fn digest_bytes(content: &[u8]) -> ContentDigest {
        ContentDigest(format!("{:x}", Sha256::digest(content)))
    }

    /// Compute the digest of a stream, consuming it exactly once
    ///
    /// Reads through an 8KB buffer so arbitrarily large inputs never sit in
    /// memory. Read failures surface as I/O errors.
    pub async fn digest_reader<R>(reader: R) -> Result<ContentDigest>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, reader);
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer).await?;
            if bytes_read == 0 {
                break; // EOF
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self::finalize(hasher))
    }

    pub(crate) fn finalize(hasher: Sha256) -> ContentDigest {
        ContentDigest(format!("{:x}", hasher.finalize()))
    }
}
