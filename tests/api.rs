//! End-to-end tests: a real server on an ephemeral port, driven by the
//! crate's own client.

use std::net::SocketAddr;
use std::path::Path;

use bytes::Bytes;
use clipdrop::client::{Client, Error};
use clipdrop::server::{AppState, router};
use futures_util::TryStreamExt;
use reqwest::StatusCode;
use tempfile::tempdir;
use tokio::net::TcpListener;

async fn spawn_server(upload_dir: &Path, max_upload_size: usize) -> SocketAddr {
    let state = AppState::open(upload_dir).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state, max_upload_size))
            .await
            .unwrap();
    });
    addr
}

async fn connect(upload_dir: &Path) -> (Client, SocketAddr) {
    let addr = spawn_server(upload_dir, 1024 * 1024).await;
    (Client::new(addr.to_string()).unwrap(), addr)
}

fn status_of<T: std::fmt::Debug>(result: Result<T, Error>) -> StatusCode {
    match result {
        Err(Error::Status { status, .. }) => status,
        other => panic!("expected a status error, got {other:?}"),
    }
}

#[tokio::test]
async fn posted_text_shows_up_in_history() {
    let dir = tempdir().unwrap();
    let (client, _) = connect(dir.path()).await;

    client.copy("hello").await.unwrap();

    assert_eq!(client.history().await.unwrap(), vec!["hello"]);
    assert_eq!(client.paste().await.unwrap().as_deref(), Some("hello"));
}

#[tokio::test]
async fn history_is_newest_first_and_clearable() {
    let dir = tempdir().unwrap();
    let (client, _) = connect(dir.path()).await;

    client.copy("a").await.unwrap();
    client.copy("b").await.unwrap();
    assert_eq!(client.history().await.unwrap(), vec!["b", "a"]);

    client.clear_history().await.unwrap();
    assert!(client.history().await.unwrap().is_empty());
    assert_eq!(client.paste().await.unwrap(), None);
}

#[tokio::test]
async fn history_response_shape() {
    let dir = tempdir().unwrap();
    let (client, addr) = connect(dir.path()).await;
    client.copy("x").await.unwrap();

    let body = reqwest::get(format!("http://{addr}/clipboard/history"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(body, r#"{"history":["x"]}"#);
}

#[tokio::test]
async fn clipboard_post_without_text_is_rejected() {
    let dir = tempdir().unwrap();
    let (client, addr) = connect(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/clipboard"))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(client.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn upload_list_remove_download() {
    let dir = tempdir().unwrap();
    let (client, _) = connect(dir.path()).await;

    let stored = client
        .upload_bytes("report.txt", b"quarterly numbers".to_vec())
        .await
        .unwrap();
    assert_eq!(stored, "report.txt");
    assert_eq!(client.files().await.unwrap(), vec!["report.txt"]);

    let chunks: Vec<Bytes> = client
        .download("report.txt")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(chunks.concat(), b"quarterly numbers");

    client.remove("report.txt").await.unwrap();
    assert!(client.files().await.unwrap().is_empty());
    assert!(!dir.path().join("report.txt").exists());

    let missing = client.download("report.txt").await.map(|_| ());
    assert_eq!(status_of(missing), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_response_shape() {
    let dir = tempdir().unwrap();
    let (_, addr) = connect(dir.path()).await;

    let part = reqwest::multipart::Part::bytes(b"hi".to_vec()).file_name("note.txt");
    let form = reqwest::multipart::Form::new().part("file", part);
    let body = reqwest::Client::new()
        .post(format!("http://{addr}/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(
        body,
        r#"{"message":"File uploaded successfully!","filename":"note.txt"}"#
    );
}

#[tokio::test]
async fn upload_from_disk_streams_file() {
    let dir = tempdir().unwrap();
    let source_dir = tempdir().unwrap();
    let source = source_dir.path().join("photo (1).jpg");
    let contents: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
    std::fs::write(&source, &contents).unwrap();
    let (client, _) = connect(dir.path()).await;

    let stored = client.upload(&source).await.unwrap();

    assert_eq!(stored, "photo (1).jpg");
    assert_eq!(client.files().await.unwrap(), vec!["photo (1).jpg"]);
    assert_eq!(std::fs::read(dir.path().join("photo (1).jpg")).unwrap(), contents);
}

#[tokio::test]
async fn reupload_overwrites_and_moves_to_front() {
    let dir = tempdir().unwrap();
    let (client, _) = connect(dir.path()).await;

    client.upload_bytes("a.txt", b"one".to_vec()).await.unwrap();
    client.upload_bytes("b.txt", b"two".to_vec()).await.unwrap();
    client.upload_bytes("a.txt", b"three".to_vec()).await.unwrap();

    assert_eq!(client.files().await.unwrap(), vec!["a.txt", "b.txt"]);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "three"
    );
}

#[tokio::test]
async fn upload_with_unsafe_name_is_rejected() {
    let dir = tempdir().unwrap();
    let storage = dir.path().join("uploads");
    let (client, _) = connect(&storage).await;

    let result = client.upload_bytes("../escape.txt", b"x".to_vec()).await;

    assert_eq!(status_of(result), StatusCode::BAD_REQUEST);
    assert!(!dir.path().join("escape.txt").exists());
    assert!(client.files().await.unwrap().is_empty());
}

#[tokio::test]
async fn upload_without_file_field_is_rejected() {
    let dir = tempdir().unwrap();
    let (client, addr) = connect(dir.path()).await;

    let form = reqwest::multipart::Form::new().text("note", "no file here");
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(client.files().await.unwrap().is_empty());
}

#[tokio::test]
async fn upload_over_limit_is_rejected() {
    let dir = tempdir().unwrap();
    let addr = spawn_server(dir.path(), 1024).await;
    let client = Client::new(addr.to_string()).unwrap();

    let result = client.upload_bytes("big.bin", vec![7u8; 8 * 1024]).await;

    assert_eq!(status_of(result), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(client.files().await.unwrap().is_empty());
    assert!(!dir.path().join("big.bin").exists());
}

#[tokio::test]
async fn removing_unknown_file_fails_without_touching_list() {
    let dir = tempdir().unwrap();
    let (client, _) = connect(dir.path()).await;
    client.upload_bytes("kept.txt", b"k".to_vec()).await.unwrap();

    match client.remove("never-uploaded.txt").await {
        Err(Error::Status { status, message }) => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(message, "Failed to delete file never-uploaded.txt");
        }
        other => panic!("expected a 500, got {other:?}"),
    }
    assert_eq!(client.files().await.unwrap(), vec!["kept.txt"]);
}

#[tokio::test]
async fn removing_file_deleted_out_of_band_succeeds() {
    let dir = tempdir().unwrap();
    let (client, _) = connect(dir.path()).await;
    client.upload_bytes("stale.txt", b"s".to_vec()).await.unwrap();
    std::fs::remove_file(dir.path().join("stale.txt")).unwrap();

    client.remove("stale.txt").await.unwrap();

    assert!(client.files().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_failure_is_a_plain_text_500() {
    let dir = tempdir().unwrap();
    let (client, _) = connect(dir.path()).await;
    std::fs::create_dir(dir.path().join("folder")).unwrap();

    match client.remove("folder").await {
        Err(Error::Status { status, message }) => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(message, "Failed to delete file folder");
        }
        other => panic!("expected a 500, got {other:?}"),
    }
}

#[tokio::test]
async fn download_to_writes_file() {
    let dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let (client, _) = connect(dir.path()).await;
    client.upload_bytes("notes.txt", b"saved".to_vec()).await.unwrap();
    let output = out_dir.path().join("copy.txt");

    let written = client.download_to("notes.txt", &output).await.unwrap();

    assert_eq!(written, 5);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "saved");
    assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn failed_download_leaves_no_file() {
    let dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let (client, _) = connect(dir.path()).await;
    let output = out_dir.path().join("missing.txt");

    let result = client.download_to("missing.txt", &output).await;

    assert_eq!(status_of(result), StatusCode::NOT_FOUND);
    assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn interrupted_download_leaves_no_file() {
    // A server that promises more bytes than it sends, then hangs up.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\nonly part")
            .await
            .unwrap();
    });
    let out_dir = tempdir().unwrap();
    let output = out_dir.path().join("cut.txt");
    let client = Client::new(addr.to_string()).unwrap();

    let result = client.download_to("cut.txt", &output).await;

    assert!(matches!(result, Err(Error::Transport(_))), "{result:?}");
    assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn files_present_at_startup_are_listed() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("left-over.txt"), "from last run").unwrap();
    let (client, _) = connect(dir.path()).await;

    assert_eq!(client.files().await.unwrap(), vec!["left-over.txt"]);
}

#[tokio::test]
async fn serves_browser_page() {
    let dir = tempdir().unwrap();
    let (_, addr) = connect(dir.path()).await;

    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.text().await.unwrap().contains("/script.js"));

    let response = reqwest::get(format!("http://{addr}/script.js")).await.unwrap();
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "text/javascript; charset=utf-8"
    );
}
