use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/**
 * Application error type - uses miette for user-facing diagnostics
 *
 * Variants follow the storage fault taxonomy: definitive negatives
 * (`NotFound`, `Duplicate`), per-input faults (`CorruptArchive`),
 * transient faults (`Io`, `IoDetailed`, `RemoteFetch`) and store
 * inconsistencies (`InconsistentState`, `Integrity`).
 */
#[derive(Error, Debug, Diagnostic)]
pub enum AppError {
    #[error("IO error: {0}")]
    #[diagnostic(code(vault::io_error))]
    Io(#[from] std::io::Error),

    #[error("IO error: {message}")]
    #[diagnostic(code(vault::io_error_detailed))]
    IoDetailed {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Not found: {0}")]
    #[diagnostic(code(vault::not_found))]
    NotFound(String),

    #[error("Bundle already stored: {0}")]
    #[diagnostic(
        code(vault::duplicate),
        help("Bundle names are unique; re-ingesting an existing name is a no-op")
    )]
    Duplicate(String),

    #[error("Corrupt archive: {message}")]
    #[diagnostic(
        code(vault::corrupt_archive),
        help("Ensure the archive file is not corrupted and is a zip container")
    )]
    CorruptArchive {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Remote fetch failed: {message}")]
    #[diagnostic(code(vault::remote_fetch))]
    RemoteFetch {
        message: String,
        status: Option<u16>,
    },

    #[error("Inconsistent state: bundle {bundle} references missing blob {digest}")]
    #[diagnostic(
        code(vault::inconsistent_state),
        help("The blob store was interrupted or modified out-of-band; re-ingest the bundle source")
    )]
    InconsistentState { bundle: String, digest: String },

    #[error("Integrity error: expected digest {expected}, computed {actual}")]
    #[diagnostic(code(vault::integrity))]
    Integrity { expected: String, actual: String },

    #[error("Invalid digest: {0}")]
    #[diagnostic(code(vault::invalid_digest))]
    InvalidDigest(String),

    #[error("Invalid path: {0}")]
    #[diagnostic(
        code(vault::invalid_path),
        help("Ensure the path is valid and accessible")
    )]
    InvalidPath(String),

    #[error("Database error: {0}")]
    #[diagnostic(
        code(vault::database_error),
        help("Check database connection and schema integrity")
    )]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(vault::config_error))]
    Config(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(vault::internal_error))]
    Internal(String),
}

impl AppError {
    /**
     * 为错误添加上下文信息
     */
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let context = context.into();
        match self {
            AppError::CorruptArchive { message, path } => AppError::CorruptArchive {
                message: format!("{}: {}", context, message),
                path,
            },
            AppError::RemoteFetch { message, status } => AppError::RemoteFetch {
                message: format!("{}: {}", context, message),
                status,
            },
            other => other,
        }
    }

    /**
     * 创建归档错误
     */
    pub fn archive_error(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        AppError::CorruptArchive {
            message: message.into(),
            path,
        }
    }

    /**
     * 创建远程读取错误
     */
    pub fn remote_error(message: impl Into<String>, status: Option<u16>) -> Self {
        AppError::RemoteFetch {
            message: message.into(),
            status,
        }
    }

    /**
     * 创建未找到错误
     */
    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    /**
     * 创建数据库错误
     */
    pub fn database_error(message: impl Into<String>) -> Self {
        AppError::DatabaseError(message.into())
    }

    /**
     * 创建详细的IO错误
     */
    pub fn io_error(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        AppError::IoDetailed {
            message: message.into(),
            path,
        }
    }

    /// Transient faults abort the current unit of work but may succeed on retry.
    /// Client-side HTTP statuses (4xx) are definitive.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Io(_) | AppError::IoDetailed { .. } => true,
            AppError::RemoteFetch { status, .. } => status.map_or(true, |code| code >= 500),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

/**
 * 统一结果类型
 */
pub type Result<T> = std::result::Result<T, AppError>;
