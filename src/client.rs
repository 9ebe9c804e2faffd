use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt, pin_mut};
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::messages::{GetFilesResponse, GetHistoryResponse, PostClipboardRequest, UploadResponse};
use crate::server::UPLOAD_FIELD;

#[derive(Error, Debug)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid addr: {0}")]
    Url(#[from] url::ParseError),
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no usable file name in {0}")]
    InvalidPath(String),
    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },
}

type Result<T> = std::result::Result<T, Error>;

pub struct Client {
    client: reqwest::Client,
    base_url: Url,
}

impl Client {
    pub fn new(url: String) -> Result<Self> {
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url
        } else {
            format!("http://{}", url)
        };

        // No overall timeout: uploads and downloads can legitimately be long.
        let client = reqwest::Client::builder()
            .user_agent("clipdrop/1.0")
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&url)?,
        })
    }

    /// Builds an endpoint url, percent-encoding each path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .clear()
            .extend(segments);
        Ok(url)
    }

    pub async fn copy(&self, text: &str) -> Result<()> {
        let url = self.endpoint(&["clipboard"])?;
        let request = PostClipboardRequest {
            text: Some(text.to_string()),
        };
        check(self.client.post(url).json(&request).send().await?).await?;
        Ok(())
    }

    /// The most recent clipboard entry, if any.
    pub async fn paste(&self) -> Result<Option<String>> {
        Ok(self.history().await?.into_iter().next())
    }

    pub async fn history(&self) -> Result<Vec<String>> {
        let url = self.endpoint(&["clipboard", "history"])?;
        let response = check(self.client.get(url).send().await?).await?;
        Ok(response.json::<GetHistoryResponse>().await?.history)
    }

    pub async fn clear_history(&self) -> Result<()> {
        let url = self.endpoint(&["clipboard", "history"])?;
        check(self.client.delete(url).send().await?).await?;
        Ok(())
    }

    /// Streams the file at `path` to the server under its own file name.
    /// Returns the name the server stored it as.
    pub async fn upload(&self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?
            .to_string();

        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        self.upload_part(Part::stream_with_length(body, len).file_name(name))
            .await
    }

    pub async fn upload_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        self.upload_part(Part::bytes(bytes).file_name(name.to_string()))
            .await
    }

    async fn upload_part(&self, part: Part) -> Result<String> {
        let url = self.endpoint(&["upload"])?;
        let form = Form::new().part(UPLOAD_FIELD, part);
        let response = check(self.client.post(url).multipart(form).send().await?).await?;
        Ok(response.json::<UploadResponse>().await?.filename)
    }

    pub async fn files(&self) -> Result<Vec<String>> {
        let url = self.endpoint(&["files"])?;
        let response = check(self.client.get(url).send().await?).await?;
        Ok(response.json::<GetFilesResponse>().await?.files)
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let url = self.endpoint(&["files", name])?;
        check(self.client.delete(url).send().await?).await?;
        Ok(())
    }

    pub async fn download(&self, name: &str) -> Result<impl Stream<Item = Result<Bytes>>> {
        let url = self.endpoint(&["uploads", name])?;
        let response = check(self.client.get(url).send().await?).await?;

        let stream = response
            .bytes_stream()
            .map(|result| result.map_err(Error::from));

        Ok(stream)
    }

    /// Downloads `name` into `output`. Bytes go to a temporary file next to
    /// `output` that is renamed into place once the whole body has arrived, so
    /// a failed transfer never leaves a truncated file behind.
    pub async fn download_to(&self, name: &str, output: &Path) -> Result<u64> {
        let stream = self.download(name).await?;
        pin_mut!(stream);

        let partial = partial_path(output);
        let written = match write_stream(&partial, stream).await {
            Ok(written) => written,
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!("couldn't remove {}: {cleanup}", partial.display());
                }
                return Err(err);
            }
        };
        tokio::fs::rename(&partial, output).await?;
        Ok(written)
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    output.with_file_name(name)
}

async fn write_stream<S>(path: &Path, mut stream: S) -> Result<u64>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = stream.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Turns a non-2xx response into `Error::Status` carrying the response body.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::Status { status, message })
}
