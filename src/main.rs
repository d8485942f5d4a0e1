//! Bundle Vault - 主入口
//!
//! - `ingest [DIR]`：导入目录下的所有文件
//! - `serve`：通过 HTTP 提供捆绑包下载

use bundle_vault::config::AppConfig;
use bundle_vault::ingest::{discover_inputs, IngestionPipeline};
use bundle_vault::logging::init_tracing;
use bundle_vault::reconstruct::ArchiveReconstructor;
use bundle_vault::server::{serve, shutdown_signal};
use bundle_vault::storage::{
    open_repository, BlobSource, ContentAddressableStorage, MetadataRepository, RemoteBlobSource,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "bundle-vault", version, about = "Content-addressed bundle storage")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest every file directly inside DIR (defaults to `ingest.input_dir`)
    Ingest { dir: Option<PathBuf> },
    /// Serve bundles over HTTP
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("{:?}", miette::Report::new(e));
        return ExitCode::FAILURE;
    }

    info!("Bundle Vault v{} starting", env!("CARGO_PKG_VERSION"));

    let repository = match open_repository(&config.storage).await {
        Ok(repository) => repository,
        Err(e) => {
            error!(error = %e, "Failed to open metadata repository");
            return ExitCode::FAILURE;
        }
    };
    let blobs = Arc::new(
        ContentAddressableStorage::new(config.storage.data_dir.clone())
            .with_extension_fallback(config.storage.extension_fallback),
    );

    let outcome = match cli.command {
        Command::Ingest { dir } => {
            let dir = dir.unwrap_or_else(|| config.ingest.input_dir.clone());
            run_ingest(&config, blobs, Arc::clone(&repository), dir).await
        }
        Command::Serve => run_serve(&config, blobs, Arc::clone(&repository)).await,
    };

    repository.close().await;

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Bundle Vault stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run_ingest(
    config: &AppConfig,
    blobs: Arc<ContentAddressableStorage>,
    repository: Arc<dyn MetadataRepository>,
    dir: PathBuf,
) -> bundle_vault::Result<()> {
    let inputs = discover_inputs(&dir)?;
    info!(dir = %dir.display(), inputs = inputs.len(), "Starting ingestion");

    let pipeline =
        IngestionPipeline::new(blobs, repository).with_spool_dir(config.storage.spool_dir.clone());
    let report = pipeline.ingest_batch(&inputs).await;

    for (path, e) in &report.failed {
        warn!(path = %path.display(), error = %e, "Input not ingested");
    }
    info!(
        stored = report.stored.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Ingestion complete"
    );

    // Per-input failures are reported, not fatal
    Ok(())
}

async fn run_serve(
    config: &AppConfig,
    blobs: Arc<ContentAddressableStorage>,
    repository: Arc<dyn MetadataRepository>,
) -> bundle_vault::Result<()> {
    let source: Arc<dyn BlobSource> = match &config.remote {
        Some(remote) => {
            info!(base_url = %remote.base_url, "Reading blobs from remote host");
            Arc::new(RemoteBlobSource::from_config(remote)?)
        }
        None => blobs,
    };

    let reconstructor =
        ArchiveReconstructor::new(repository, source).with_spool_dir(config.storage.spool_dir.clone());
    serve(&config.server, reconstructor, shutdown_signal()).await
}
