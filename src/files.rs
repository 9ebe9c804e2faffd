use std::collections::VecDeque;
use std::convert::Infallible;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, pin_mut};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

/// Leaves room for the temporary upload prefix and suffix within common
/// filesystem name limits.
const MAX_NAME_LEN: usize = 200;

/// Characters accepted in a file name besides letters and digits.
const EXTRA_NAME_CHARS: &str = " ._-()+,@[]";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("Failed to write file {name}")]
    Write {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to delete file {name}")]
    Delete {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("upload of {name} was interrupted")]
    Upload {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("storage directory error: {0}")]
    Io(#[from] io::Error),
}

/// Checks that `name` can be used as a storage key: a single path component
/// made of letters, digits and a few punctuation characters, never hidden.
pub fn validate_name(name: &str) -> Result<&str, Error> {
    let single_component = matches!(
        Path::new(name).components().collect::<Vec<_>>().as_slice(),
        [Component::Normal(_)]
    );
    let valid = single_component
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || EXTRA_NAME_CHARS.contains(c));

    if valid {
        Ok(name)
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Files stored in a directory, paired with the list of their names in
/// upload order (newest first).
///
/// The name list lock is held while a file is renamed into place or deleted,
/// so the list and the directory change together.
pub struct FileStore {
    dir: PathBuf,
    names: Mutex<VecDeque<String>>,
    next_upload: AtomicU64,
}

impl FileStore {
    /// Opens the store at `dir`, creating the directory when missing. Files
    /// already present are listed newest first by modification time.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        let names = scan(&dir).await?;
        info!("{} stored files found in {}", names.len(), dir.display());

        Ok(Self {
            dir,
            names: Mutex::new(names),
            next_upload: AtomicU64::new(0),
        })
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, Error> {
        Ok(self.dir.join(validate_name(name)?))
    }

    pub async fn add(&self, name: &str, bytes: impl Into<Bytes>) -> Result<u64, Error> {
        let chunk: Result<Bytes, Infallible> = Ok(bytes.into());
        self.add_stream(name, futures_util::stream::iter([chunk]))
            .await
    }

    /// Writes `chunks` under `name`, replacing any previous file of that name,
    /// and moves the name to the front of the list. Returns the bytes written.
    ///
    /// Data goes to a hidden temporary file first; if the stream or a write
    /// fails nothing visible changes.
    pub async fn add_stream<S, E>(&self, name: &str, chunks: S) -> Result<u64, Error>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let path = self.path_of(name)?;
        let seq = self.next_upload.fetch_add(1, Ordering::Relaxed);
        let partial = self.dir.join(format!(".{name}.{seq}.part"));

        let written = match write_chunks(&partial, name, chunks).await {
            Ok(written) => written,
            Err(err) => {
                discard(&partial).await;
                return Err(err);
            }
        };

        let mut names = self.names.lock().await;
        if let Err(source) = fs::rename(&partial, &path).await {
            discard(&partial).await;
            return Err(Error::Write {
                name: name.to_string(),
                source,
            });
        }
        names.retain(|n| n != name);
        names.push_front(name.to_string());

        info!("stored {name} ({written} bytes)");
        Ok(written)
    }

    pub async fn list(&self) -> Vec<String> {
        self.names.lock().await.iter().cloned().collect()
    }

    /// Deletes `name` from disk and from the list.
    ///
    /// A listed name whose file is already gone is dropped from the list and
    /// counts as removed. A name that is neither listed nor on disk fails like
    /// any other delete error. On any failure the list is left as it was.
    pub async fn remove(&self, name: &str) -> Result<(), Error> {
        let path = self.path_of(name)?;
        let mut names = self.names.lock().await;

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                if !names.iter().any(|n| n == name) {
                    return Err(Error::Delete {
                        name: name.to_string(),
                        source,
                    });
                }
                warn!("{name} was already missing from disk, dropping it from the list");
            }
            Err(source) => {
                return Err(Error::Delete {
                    name: name.to_string(),
                    source,
                });
            }
        }

        names.retain(|n| n != name);
        info!("removed {name}");
        Ok(())
    }

    /// Opens a stored file for streaming. Returns the stream and the file size.
    pub async fn open_file(&self, name: &str) -> Result<(ReaderStream<File>, u64), Error> {
        let path = self.path_of(name)?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(Error::NotFound(name.to_string()));
        }

        Ok((ReaderStream::new(file), metadata.len()))
    }
}

async fn write_chunks<S, E>(path: &Path, name: &str, chunks: S) -> Result<u64, Error>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    pin_mut!(chunks);
    let write_err = |source: io::Error| Error::Write {
        name: name.to_string(),
        source,
    };

    let mut file = File::create(path).await.map_err(write_err)?;
    let mut written = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|source| Error::Upload {
            name: name.to_string(),
            source: source.into(),
        })?;
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;

    Ok(written)
}

async fn discard(partial: &Path) {
    if let Err(err) = fs::remove_file(partial).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("couldn't remove {}: {err}", partial.display());
        }
    }
}

/// Temporary files written by `add_stream`; any found at startup belong to
/// uploads that never finished.
fn is_partial_upload(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".part")
}

async fn scan(dir: &Path) -> Result<VecDeque<String>, Error> {
    let mut found = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if is_partial_upload(&name) {
            info!("removing unfinished upload {name:?}");
            discard(&entry.path()).await;
            continue;
        }
        if validate_name(&name).is_err() {
            debug!("ignoring {name:?} in {}", dir.display());
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, name));
    }

    found.sort_by(|a, b| b.cmp(a));
    Ok(found.into_iter().map(|(_, name)| name).collect())
}
