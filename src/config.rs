//! 配置管理
//!
//! 分层加载：内置默认值 → 可选 TOML 文件 → 环境变量
//! （前缀 `BUNDLE_VAULT`，层级分隔符 `__`，例如 `BUNDLE_VAULT__SERVER__PORT=9000`）。
//! 加载后统一经过 `validator` 校验。

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

pub const ENV_PREFIX: &str = "BUNDLE_VAULT";
const ENV_SEPARATOR: &str = "__";

/// 全局配置根结构
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub storage: StorageConfig,

    #[validate(nested)]
    pub server: ServerConfig,

    /// Remote blob host; when set, reconstruction reads blobs from it
    #[validate(nested)]
    pub remote: Option<RemoteConfig>,

    #[validate(nested)]
    pub ingest: IngestConfig,

    #[validate(nested)]
    pub logging: LoggingConfig,
}

/// Metadata persistence engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    #[default]
    Sqlite,
    Json,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of `objects/`, `tmp/` and the metadata file
    #[validate(custom(function = "validate_non_empty_path"))]
    pub data_dir: PathBuf,

    pub metadata_backend: MetadataBackend,

    /// Where archive entries and rebuilt archives are spooled (system temp if unset)
    #[validate(custom(function = "validate_non_empty_path"))]
    pub spool_dir: Option<PathBuf>,

    /// Also look for `<digest>.<ext>` leaves. Costs a shard listing per miss.
    pub extension_fallback: bool,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    #[validate(length(min = 1, max = 100))]
    pub host: String,

    #[validate(range(min = 1))]
    pub port: u16,
}

/// 远程对象读取配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RemoteConfig {
    #[validate(url)]
    pub base_url: String,

    #[serde(default = "default_remote_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,

    #[serde(default = "default_remote_max_retries")]
    #[validate(range(max = 10))]
    pub max_retries: usize,

    #[serde(default = "default_remote_base_delay_ms")]
    #[validate(range(min = 1, max = 60000))]
    pub base_delay_ms: u64,

    #[serde(default = "default_remote_max_delay_ms")]
    #[validate(range(min = 1, max = 300000))]
    pub max_delay_ms: u64,
}

fn default_remote_timeout_secs() -> u64 {
    30
}

fn default_remote_max_retries() -> usize {
    3
}

fn default_remote_base_delay_ms() -> u64 {
    100
}

fn default_remote_max_delay_ms() -> u64 {
    2000
}

/// 导入配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory scanned by `ingest` when no directory is given
    #[validate(custom(function = "validate_non_empty_path"))]
    pub input_dir: PathBuf,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[validate(length(min = 1, max = 200))]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metadata_backend: MetadataBackend::default(),
            spool_dir: None,
            extension_fallback: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("repofiles"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn validate_non_empty_path(path: &PathBuf) -> std::result::Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("empty_path"));
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration from the optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), reading overrides from `env` instead of the
    /// process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let settings = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .validate()
            .map_err(|e| AppError::Config(format!("Invalid configuration: {}", e)))?;

        Ok(config)
    }
}
