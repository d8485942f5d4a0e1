//! Reconstruction through the HTTP blob source against an in-process blob host

mod common;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bundle_vault::config::MetadataBackend;
use bundle_vault::reconstruct::{NotFoundReason, Resolution};
use bundle_vault::storage::{BlobSource, ContentHasher, RemoteBlobSource};
use bundle_vault::utils::RetryPolicy;
use bundle_vault::AppError;
use common::{read_body, zip_entries, Workspace};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

/// Serves `root/<key>` for `GET /objects/<key>`
async fn serve_objects(State(root): State<Arc<PathBuf>>, Path(key): Path<String>) -> Response {
    match tokio::fs::read(root.join(&key)).await {
        Ok(bytes) => bytes.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn always_failing(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
    hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn spawn_host(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn spawn_blob_host(objects_dir: PathBuf) -> String {
    let app = Router::new()
        .route("/objects/{*key}", get(serve_objects))
        .with_state(Arc::new(objects_dir));
    format!("{}/objects", spawn_host(app).await)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 10,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_reconstruction_matches_local() {
    let ws = Workspace::new(MetadataBackend::Sqlite).await;
    let path = ws.write_zip(
        "skins.zip",
        &[("b.txt", b"hello"), ("a.txt", b"hello"), ("c.txt", b"world")],
    );
    ws.pipeline().ingest_path(&path).await.unwrap();

    let base_url = spawn_blob_host(ws.cas.objects_dir().to_path_buf()).await;
    let remote = RemoteBlobSource::new(&base_url, Duration::from_secs(5), fast_retry()).unwrap();
    let reconstructor = ws.reconstructor_with(Arc::new(remote));

    let Resolution::Found(resolved) = reconstructor.resolve("skins.zip").await.unwrap() else {
        panic!("skins.zip should resolve remotely");
    };
    assert_eq!(
        zip_entries(&read_body(resolved).await),
        vec![
            ("b.txt".to_string(), b"hello".to_vec()),
            ("a.txt".to_string(), b"hello".to_vec()),
            ("c.txt".to_string(), b"world".to_vec()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_plain_file_streams_bytes() {
    let ws = Workspace::new(MetadataBackend::Json).await;
    let content: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
    let path = ws.write_input("logo.png", &content);
    ws.pipeline().ingest_path(&path).await.unwrap();

    let base_url = spawn_blob_host(ws.cas.objects_dir().to_path_buf()).await;
    let remote = RemoteBlobSource::new(&base_url, Duration::from_secs(5), fast_retry()).unwrap();

    let Resolution::Found(resolved) = ws
        .reconstructor_with(Arc::new(remote))
        .resolve("logo.png")
        .await
        .unwrap()
    else {
        panic!("logo.png should resolve remotely");
    };
    assert_eq!(resolved.media_type, "image/png");
    assert_eq!(read_body(resolved).await, content);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_404_is_missing_blob() {
    let ws = Workspace::new(MetadataBackend::Sqlite).await;
    let path = ws.write_zip("skins.zip", &[("a.txt", b"present"), ("b.txt", b"gone")]);
    ws.pipeline().ingest_path(&path).await.unwrap();

    let gone = ContentHasher::digest_bytes(b"gone");
    std::fs::remove_file(ws.cas.get_object_path(&gone)).unwrap();

    let base_url = spawn_blob_host(ws.cas.objects_dir().to_path_buf()).await;
    let remote = RemoteBlobSource::new(&base_url, Duration::from_secs(5), fast_retry()).unwrap();

    let resolution = ws
        .reconstructor_with(Arc::new(remote))
        .resolve("skins.zip")
        .await
        .unwrap();
    assert!(matches!(
        resolution,
        Resolution::NotFound(NotFoundReason::MissingBlob { digest }) if digest == gone.as_str()
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_server_errors_are_retried_then_surface() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/{*key}", get(always_failing))
        .with_state(hits.clone());
    let base_url = spawn_host(app).await;

    let remote = RemoteBlobSource::new(&base_url, Duration::from_secs(5), fast_retry()).unwrap();
    let result = remote.open(&ContentHasher::digest_bytes(b"anything")).await;

    assert!(matches!(
        result,
        Err(AppError::RemoteFetch { status: Some(500), .. })
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 3, "one attempt plus two retries");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_connection_refused_is_remote_fetch_without_status() {
    // Bind then drop to get a local port nothing listens on
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let base_url = format!("http://{}/objects", addr);

    let remote = RemoteBlobSource::new(&base_url, Duration::from_secs(5), fast_retry()).unwrap();
    let result = remote.open(&ContentHasher::digest_bytes(b"anything")).await;

    assert!(matches!(
        result,
        Err(AppError::RemoteFetch { status: None, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_fetch_by_key() {
    let ws = Workspace::new(MetadataBackend::Json).await;
    let digest = ws.cas.store_bytes(b"fetched by key").await.unwrap();

    let base_url = spawn_blob_host(ws.cas.objects_dir().to_path_buf()).await;
    let remote = RemoteBlobSource::new(&base_url, Duration::from_secs(5), fast_retry()).unwrap();

    let mut body = remote.fetch(&digest.shard_key()).await.unwrap();
    let mut bytes = Vec::new();
    body.read_to_end(&mut bytes).await.unwrap();
    assert_eq!(bytes, b"fetched by key");

    let missing = remote.fetch("0/0/0/does-not-exist").await;
    assert!(matches!(missing, Err(e) if e.is_not_found()));
}
