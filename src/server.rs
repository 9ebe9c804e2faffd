use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use log::{debug, error, info};
use thiserror::Error;

use crate::assets;
use crate::files::{self, FileStore};
use crate::history::HistoryStore;
use crate::messages::{GetFilesResponse, GetHistoryResponse, PostClipboardRequest, UploadResponse};

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

const UPLOAD_MESSAGE: &str = "File uploaded successfully!";

pub struct ServerConfig {
    pub addr: String,
    pub upload_dir: PathBuf,
    /// Request body limit for `/upload`, in bytes.
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            upload_dir: PathBuf::from("uploads"),
            max_upload_size: 1024 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    history: Arc<HistoryStore>,
    files: Arc<FileStore>,
}

impl AppState {
    pub async fn open(upload_dir: impl AsRef<FsPath>) -> Result<Self, Error> {
        let files = FileStore::open(upload_dir.as_ref()).await?;
        Ok(Self::from_stores(HistoryStore::new(), files))
    }

    pub fn from_stores(history: HistoryStore, files: FileStore) -> Self {
        AppState {
            history: Arc::new(history),
            files: Arc::new(files),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Files(#[from] files::Error),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::MissingField(_) => StatusCode::BAD_REQUEST,
            Error::Multipart(err) => err.status(),
            Error::Files(files::Error::InvalidName(_)) => StatusCode::BAD_REQUEST,
            Error::Files(files::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            // The body stream failed; the multipart layer knows whether it was
            // the size limit or a broken request.
            Error::Files(files::Error::Upload { source, .. }) => source
                .downcast_ref::<MultipartError>()
                .map_or(StatusCode::BAD_REQUEST, MultipartError::status),
            Error::Files(_) | Error::Network(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            match std::error::Error::source(&self) {
                Some(source) => error!("{self}: {source}"),
                None => error!("{self}"),
            }
        } else {
            debug!("rejected request ({status}): {self}");
        }

        (status, self.to_string()).into_response()
    }
}

pub fn router(state: AppState, max_upload_size: usize) -> Router {
    Router::new()
        .route("/", get(assets::index))
        .route("/index.html", get(assets::index))
        .route("/script.js", get(assets::script))
        .route("/style.css", get(assets::style))
        .route("/clipboard", post(post_clipboard))
        .route("/clipboard/history", get(get_history).delete(clear_history))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/files", get(list_files))
        .route("/files/{filename}", delete(remove_file))
        .route("/uploads/{filename}", get(download))
        .with_state(state)
}

pub async fn serve(config: ServerConfig) -> Result<(), Error> {
    let state = AppState::open(&config.upload_dir).await?;
    let app = router(state, config.max_upload_size);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    info!(
        "listening on http://{}, storing uploads in {}",
        listener.local_addr()?,
        config.upload_dir.display()
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("couldn't listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn post_clipboard(
    State(state): State<AppState>,
    Json(request): Json<PostClipboardRequest>,
) -> Result<StatusCode, Error> {
    let text = request.text.ok_or(Error::MissingField("text"))?;
    state.history.append(text).await;
    Ok(StatusCode::OK)
}

async fn get_history(State(state): State<AppState>) -> Json<GetHistoryResponse> {
    Json(GetHistoryResponse {
        history: state.history.list().await,
    })
}

async fn clear_history(State(state): State<AppState>) -> StatusCode {
    state.history.clear().await;
    StatusCode::OK
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, Error> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!("skipping multipart field {:?}", field.name());
            continue;
        }

        let filename = field
            .file_name()
            .ok_or(Error::MissingField("filename"))?
            .to_owned();
        state.files.add_stream(&filename, field).await?;

        return Ok(Json(UploadResponse {
            message: UPLOAD_MESSAGE.to_string(),
            filename,
        }));
    }

    Err(Error::MissingField(UPLOAD_FIELD))
}

async fn list_files(State(state): State<AppState>) -> Json<GetFilesResponse> {
    Json(GetFilesResponse {
        files: state.files.list().await,
    })
}

async fn remove_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<StatusCode, Error> {
    state.files.remove(&filename).await?;
    Ok(StatusCode::OK)
}

async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, Error> {
    let (stream, len) = state.files.open_file(&filename).await?;
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, len.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}
