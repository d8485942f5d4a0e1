//! 捆绑包模型
//!
//! A bundle is one ingested input (a plain file or a zip archive) recorded as
//! an ordered list of members. Member order is the archive member order and
//! is reproduced verbatim on reconstruction.

use crate::archive::{is_archive_name, is_directory_name};
use crate::storage::ContentDigest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a bundle is stored and served, decided by its name's suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    /// Single plain file with exactly one member
    File,
    /// Zip container, one member per entry
    Archive,
}

impl BundleKind {
    /// Classify a bundle name. Unrecognized suffixes fall back to `File`.
    pub fn of(bundle_name: &str) -> Self {
        if is_archive_name(bundle_name) {
            BundleKind::Archive
        } else {
            BundleKind::File
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BundleKind::File => "file",
            BundleKind::Archive => "archive",
        }
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named entry of a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Original file name or in-archive path
    pub name: String,
    pub digest: ContentDigest,
}

impl Member {
    pub fn new(name: impl Into<String>, digest: ContentDigest) -> Self {
        Self {
            name: name.into(),
            digest,
        }
    }

    /// A zip directory entry: directory-style name and no content.
    ///
    /// A `name\` entry that carries bytes is a file and keeps its content.
    pub fn is_directory(&self) -> bool {
        is_directory_name(&self.name) && self.digest.is_empty_content()
    }
}

/// A named, previously ingested unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub name: String,
    pub members: Vec<Member>,
}

impl Bundle {
    pub fn new(name: impl Into<String>, members: Vec<Member>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }

    pub fn kind(&self) -> BundleKind {
        BundleKind::of(&self.name)
    }
}
