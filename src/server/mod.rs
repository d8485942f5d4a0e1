//! HTTP delivery of reconstructed bundles
//!
//! - `GET /getfile/{file}`: stream a bundle by name
//! - `GET /healthz`: liveness check

use crate::config::ServerConfig;
use crate::error::{AppError, Result};
use crate::reconstruct::{ArchiveReconstructor, Resolution, ResolvedBundle};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

pub struct ServerState {
    pub(crate) reconstructor: ArchiveReconstructor,
}

pub fn router(reconstructor: ArchiveReconstructor) -> Router {
    let state = Arc::new(ServerState { reconstructor });

    Router::new()
        .route("/healthz", get(healthz))
        .route("/getfile/{file}", get(get_file))
        .with_state(state)
}

/// Bind `config.host:config.port` and serve until `shutdown` resolves
pub async fn serve<F>(config: &ServerConfig, reconstructor: ArchiveReconstructor, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| {
            AppError::io_error(
                format!("Failed to bind {}:{}: {}", config.host, config.port, e),
                None,
            )
        })?;
    info!(addr = %listener.local_addr()?, "Serving bundles");

    axum::serve(listener, router(reconstructor))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::io_error(format!("Server error: {}", e), None))
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_file(State(state): State<Arc<ServerState>>, Path(file): Path<String>) -> Response {
    match state.reconstructor.resolve(&file).await {
        Ok(Resolution::Found(resolved)) => bundle_response(resolved),
        Ok(Resolution::NotFound(_)) => (StatusCode::NOT_FOUND, "not found").into_response(),
        Err(e) => {
            let status = status_for(&e);
            error!(bundle = %file, status = status.as_u16(), error = %e, "Failed to resolve bundle");
            // Error details carry local paths and upstream URLs; they stay in the log
            let reason = status.canonical_reason().unwrap_or("error");
            (status, reason).into_response()
        }
    }
}

fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::RemoteFetch { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bundle_response(resolved: ResolvedBundle) -> Response {
    let content_type = HeaderValue::from_str(&resolved.media_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = format!(
        "attachment; filename=\"{}\"",
        header_safe_filename(&resolved.download_name)
    );

    let mut response = Response::new(Body::from_stream(ReaderStream::new(resolved.body)));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// Quoted-string safe, visible ASCII only
fn header_safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestionPipeline;
    use crate::models::{Bundle, Member};
    use crate::storage::{
        BlobReader, BlobSource, ContentAddressableStorage, ContentDigest, ContentHasher,
        JsonSnapshotStore, MetadataRepository,
    };
    use async_trait::async_trait;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct FailingSource;

    #[async_trait]
    impl BlobSource for FailingSource {
        async fn open(&self, _digest: &ContentDigest) -> crate::error::Result<BlobReader> {
            Err(AppError::remote_error("upstream unavailable", Some(503)))
        }
    }

    fn local_app(dir: &TempDir) -> (Router, IngestionPipeline) {
        let data = dir.path().join("data");
        let cas = Arc::new(ContentAddressableStorage::new(data.clone()));
        let repository: Arc<dyn MetadataRepository> =
            Arc::new(JsonSnapshotStore::new(&data).unwrap());
        let pipeline = IngestionPipeline::new(cas.clone(), repository.clone());
        (router(ArchiveReconstructor::new(repository, cas)), pipeline)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let dir = TempDir::new().unwrap();
        let (app, _) = local_app(&dir);

        let response = app.oneshot(get("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_getfile_streams_plain_file() {
        let dir = TempDir::new().unwrap();
        let (app, pipeline) = local_app(&dir);
        let path = dir.path().join("logo.png");
        std::fs::write(&path, b"fake png").unwrap();
        pipeline.ingest_path(&path).await.unwrap();

        let response = app.oneshot(get("/getfile/logo.png")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"logo.png\""
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"fake png");
    }

    #[tokio::test]
    async fn test_getfile_unknown_is_404() {
        let dir = TempDir::new().unwrap();
        let (app, _) = local_app(&dir);

        let response = app.oneshot(get("/getfile/unknown.zip")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_remote_failure_is_502() {
        let dir = TempDir::new().unwrap();
        let repository = Arc::new(JsonSnapshotStore::new(dir.path()).unwrap());
        repository
            .insert(&Bundle::new(
                "notes.txt",
                vec![Member::new("notes.txt", ContentHasher::digest_bytes(b"n"))],
            ))
            .await
            .unwrap();
        let app = router(ArchiveReconstructor::new(repository, Arc::new(FailingSource)));

        let response = app.oneshot(get("/getfile/notes.txt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Bad Gateway");
    }

    #[tokio::test]
    async fn test_getfile_streams_rebuilt_archive() {
        use std::io::{Read, Write};

        let dir = TempDir::new().unwrap();
        let (app, pipeline) = local_app(&dir);
        let path = dir.path().join("skins.zip");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        for (name, content) in [("b.txt", "second"), ("a.txt", "first")] {
            zip.start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        pipeline.ingest_path(&path).await.unwrap();

        let response = app.oneshot(get("/getfile/skins.zip")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"skins.zip\""
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(body.to_vec())).unwrap();
        let mut first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "b.txt");
        let mut content = String::new();
        first.read_to_string(&mut content).unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn test_header_safe_filename() {
        assert_eq!(header_safe_filename("skins.zip"), "skins.zip");
        assert_eq!(header_safe_filename("a\"b\\c.txt"), "a_b_c.txt");
        assert_eq!(header_safe_filename("naïve.png"), "na_ve.png");
    }
}
