//! Flat-file metadata repository
//!
//! Keeps the whole bundle index in memory and rewrites a JSON snapshot after
//! every insert. The snapshot is written to a temp file next to the target and
//! renamed over it, so a crash leaves either the old or the new snapshot.

use crate::error::{AppError, Result};
use crate::models::{Bundle, Member};
use crate::storage::traits::MetadataRepository;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SNAPSHOT_FILE_NAME: &str = "bundles.json";

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    bundles: Vec<Bundle>,
}

/// JSON snapshot-backed [`MetadataRepository`]
pub struct JsonSnapshotStore {
    path: PathBuf,
    bundles: RwLock<BTreeMap<String, Vec<Member>>>,
}

impl JsonSnapshotStore {
    /// Open `data_dir/bundles.json`, starting empty if it does not exist yet
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            AppError::io_error(
                format!("Failed to create data directory: {}", e),
                Some(data_dir.to_path_buf()),
            )
        })?;
        Self::open(data_dir.join(SNAPSHOT_FILE_NAME))
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        let bundles = match std::fs::read(&path) {
            Ok(raw) => {
                let snapshot: SnapshotFile = serde_json::from_slice(&raw).map_err(|e| {
                    AppError::database_error(format!(
                        "Failed to parse snapshot {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(AppError::database_error(format!(
                        "Unsupported snapshot version {}",
                        snapshot.version
                    )));
                }
                let mut index = BTreeMap::new();
                for bundle in snapshot.bundles {
                    if index.insert(bundle.name.clone(), bundle.members).is_some() {
                        return Err(AppError::database_error(format!(
                            "Snapshot lists bundle {} more than once",
                            bundle.name
                        )));
                    }
                }
                index
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(AppError::io_error(
                    format!("Failed to read snapshot: {}", e),
                    Some(path),
                ))
            }
        };

        info!(path = %path.display(), bundles = bundles.len(), "Opened metadata snapshot");

        Ok(Self {
            path,
            bundles: RwLock::new(bundles),
        })
    }

    fn write_snapshot(&self, bundles: &BTreeMap<String, Vec<Member>>) -> Result<()> {
        let snapshot = SnapshotFile {
            version: SNAPSHOT_VERSION,
            bundles: bundles
                .iter()
                .map(|(name, members)| Bundle::new(name.clone(), members.clone()))
                .collect(),
        };
        let encoded = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| AppError::Internal(format!("Failed to encode snapshot: {}", e)))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::Builder::new()
            .prefix(".bundles-")
            .tempfile_in(dir)
            .map_err(|e| {
                AppError::io_error(
                    format!("Failed to stage snapshot: {}", e),
                    Some(dir.to_path_buf()),
                )
            })?;
        staged.write_all(&encoded)?;
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|e| {
            AppError::io_error(
                format!("Failed to replace snapshot: {}", e.error),
                Some(self.path.clone()),
            )
        })?;

        Ok(())
    }
}

#[async_trait]
impl MetadataRepository for JsonSnapshotStore {
    async fn exists_by_name(&self, bundle_name: &str) -> Result<bool> {
        Ok(self.bundles.read().contains_key(bundle_name))
    }

    async fn insert(&self, bundle: &Bundle) -> Result<()> {
        let mut bundles = self.bundles.write();
        if bundles.contains_key(&bundle.name) {
            return Err(AppError::Duplicate(bundle.name.clone()));
        }

        bundles.insert(bundle.name.clone(), bundle.members.clone());
        if let Err(e) = self.write_snapshot(&bundles) {
            // Keep memory and disk in agreement
            bundles.remove(&bundle.name);
            return Err(e);
        }

        debug!(
            bundle = %bundle.name,
            members = bundle.members.len(),
            "Inserted bundle metadata"
        );
        Ok(())
    }

    async fn find_by_name(&self, bundle_name: &str) -> Result<Option<Bundle>> {
        Ok(self
            .bundles
            .read()
            .get(bundle_name)
            .map(|members| Bundle::new(bundle_name, members.clone())))
    }
}
