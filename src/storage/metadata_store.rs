//! SQLite Metadata Store
//!
//! Embedded bundle index backed by SQLite.
//!
//! ## Database Schema
//!
//! - `bundles`: one row per bundle, `name` is UNIQUE
//! - `bundle_members`: ordered `(member_name, digest)` rows keyed by
//!   `(bundle_id, position)`
//!
//! A bundle and all of its members are written in one transaction, so a
//! reader never observes a bundle with a partial member list.

use crate::error::{AppError, Result};
use crate::models::{Bundle, Member};
use crate::storage::traits::MetadataRepository;
use crate::storage::ContentDigest;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const DATABASE_FILE_NAME: &str = "metadata.db";

/// SQLite-backed [`MetadataRepository`]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Open (or create) `data_dir/metadata.db`
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The data directory cannot be created
    /// - Failed to connect to database
    /// - Failed to create tables
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await.map_err(|e| {
            AppError::io_error(
                format!("Failed to create data directory: {}", e),
                Some(data_dir.to_path_buf()),
            )
        })?;

        Self::open(&data_dir.join(DATABASE_FILE_NAME)).await
    }

    pub async fn open(db_path: &Path) -> Result<Self> {
        info!(path = %db_path.display(), "Initializing metadata store");

        // WAL allows concurrent readers (reconstruction) while ingestion writes
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options)
            .await
            .map_err(|e| {
                AppError::database_error(format!("Failed to connect to database: {}", e))
            })?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bundles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                member_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| AppError::database_error(format!("Failed to create bundles table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bundle_members (
                bundle_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                member_name TEXT NOT NULL,
                digest TEXT NOT NULL,
                PRIMARY KEY (bundle_id, position),
                FOREIGN KEY (bundle_id) REFERENCES bundles(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| {
            AppError::database_error(format!("Failed to create bundle_members table: {}", e))
        })?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bundle_members_digest ON bundle_members(digest)")
            .execute(pool)
            .await
            .map_err(|e| AppError::database_error(format!("Failed to create index: {}", e)))?;

        debug!("Database schema initialized successfully");
        Ok(())
    }
}

#[async_trait]
impl MetadataRepository for SqliteMetadataStore {
    async fn exists_by_name(&self, bundle_name: &str) -> Result<bool> {
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(1) FROM bundles WHERE name = ?")
            .bind(bundle_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database_error(format!("Failed to query bundle: {}", e)))?;

        Ok(count > 0)
    }

    async fn insert(&self, bundle: &Bundle) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database_error(format!("Failed to begin transaction: {}", e)))?;

        let inserted = sqlx::query(
            "INSERT INTO bundles (name, kind, member_count, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&bundle.name)
        .bind(bundle.kind().as_str())
        .bind(bundle.members.len() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await;

        let bundle_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                return Err(AppError::Duplicate(bundle.name.clone()));
            }
            Err(e) => {
                return Err(AppError::database_error(format!(
                    "Failed to insert bundle: {}",
                    e
                )))
            }
        };

        for (position, member) in bundle.members.iter().enumerate() {
            sqlx::query(
                "INSERT INTO bundle_members (bundle_id, position, member_name, digest) VALUES (?, ?, ?, ?)",
            )
            .bind(bundle_id)
            .bind(position as i64)
            .bind(&member.name)
            .bind(member.digest.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database_error(format!("Failed to insert member: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::database_error(format!("Failed to commit bundle: {}", e)))?;

        debug!(
            id = bundle_id,
            bundle = %bundle.name,
            members = bundle.members.len(),
            "Inserted bundle metadata"
        );

        Ok(())
    }

    async fn find_by_name(&self, bundle_name: &str) -> Result<Option<Bundle>> {
        let row = sqlx::query_as::<_, (i64, i64)>(
            "SELECT id, member_count FROM bundles WHERE name = ? LIMIT 1",
        )
        .bind(bundle_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database_error(format!("Failed to query bundle: {}", e)))?;

        let Some((bundle_id, member_count)) = row else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT member_name, digest FROM bundle_members WHERE bundle_id = ? ORDER BY position",
        )
        .bind(bundle_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database_error(format!("Failed to query members: {}", e)))?;

        if rows.len() as i64 != member_count {
            return Err(AppError::database_error(format!(
                "Bundle {} lists {} members but {} are recorded",
                bundle_name,
                member_count,
                rows.len()
            )));
        }

        let members = rows
            .into_iter()
            .map(|(name, digest)| -> Result<Member> {
                Ok(Member::new(name, ContentDigest::parse(digest)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Bundle::new(bundle_name, members)))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
