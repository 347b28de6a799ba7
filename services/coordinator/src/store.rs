//! Append-only model artifact storage on the local filesystem.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::catalog::list_visible_files;
use crate::error::{CoordinatorError, CoordinatorResult};

const NAME_PREFIX: &str = "worker_";
const NAME_ATTEMPTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub name: String,
    pub bytes: u64,
}

/// Uploaded models live under generated names `worker_<unix-millis>_<seq><ext>`.
///
/// Content is written to a hidden `.<name>.part` file and hard-linked into
/// place once complete, so listings never include partial uploads and an
/// existing artifact is never replaced.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    seq: AtomicU64,
    clock: fn() -> i64,
}

/// Fully written upload that is not yet visible in listings.
#[derive(Debug)]
pub struct PendingArtifact {
    partial: PathBuf,
    extension: String,
    bytes: u64,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(dir, || chrono::Utc::now().timestamp_millis())
    }

    pub(crate) fn with_clock(dir: impl Into<PathBuf>, clock: fn() -> i64) -> Self {
        Self { dir: dir.into(), seq: AtomicU64::new(0), clock }
    }

    /// Creates the artifact directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> CoordinatorResult<()> {
        fs::create_dir_all(&self.dir).await.map_err(CoordinatorError::WriteFailure)
    }

    pub async fn list(&self) -> CoordinatorResult<Vec<String>> {
        list_visible_files(&self.dir).await.map_err(CoordinatorError::StoreUnavailable)
    }

    /// Drains `content` into a new artifact named after `original_name`'s extension.
    pub async fn store<S, E>(&self, original_name: &str, content: S) -> CoordinatorResult<StoredArtifact>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let pending = self.stage(original_name, content).await?;
        self.commit(pending).await
    }

    /// Writes `content` to a hidden file; nothing is listed until [`ArtifactStore::commit`].
    pub async fn stage<S, E>(&self, original_name: &str, content: S) -> CoordinatorResult<PendingArtifact>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let extension = extension_of(original_name);
        let (partial, file) = self.open_partial(&extension).await?;
        match write_partial(file, content).await {
            Ok(bytes) => Ok(PendingArtifact { partial, extension, bytes }),
            Err(e) => {
                discard(&partial).await;
                Err(e)
            }
        }
    }

    /// Publishes a staged upload under a name no other artifact holds.
    pub async fn commit(&self, pending: PendingArtifact) -> CoordinatorResult<StoredArtifact> {
        let result = self.link_unique(&pending).await;
        discard(&pending.partial).await;
        let name = result?;
        debug!(%name, bytes = pending.bytes, "artifact committed");
        Ok(StoredArtifact { name, bytes: pending.bytes })
    }

    pub async fn abort(&self, pending: PendingArtifact) {
        discard(&pending.partial).await;
    }

    async fn open_partial(&self, extension: &str) -> CoordinatorResult<(PathBuf, File)> {
        let mut taken = None;
        for _ in 0..NAME_ATTEMPTS {
            let partial = self.dir.join(format!(".{}.part", self.next_name(extension)));
            match OpenOptions::new().write(true).create_new(true).open(&partial).await {
                Ok(file) => return Ok((partial, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => taken = Some(e),
                Err(e) => return Err(CoordinatorError::WriteFailure(e)),
            }
        }
        Err(names_exhausted(taken))
    }

    /// Hard-links the staged file under a fresh name; an existing name fails the link and is skipped.
    async fn link_unique(&self, pending: &PendingArtifact) -> CoordinatorResult<String> {
        let mut taken = None;
        for _ in 0..NAME_ATTEMPTS {
            let name = self.next_name(&pending.extension);
            match fs::hard_link(&pending.partial, self.dir.join(&name)).await {
                Ok(()) => return Ok(name),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!(%name, "artifact name taken, picking another");
                    taken = Some(e);
                }
                Err(e) => return Err(CoordinatorError::WriteFailure(e)),
            }
        }
        Err(names_exhausted(taken))
    }

    fn next_name(&self, extension: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{NAME_PREFIX}{}_{seq}{extension}", (self.clock)())
    }
}

fn names_exhausted(last: Option<std::io::Error>) -> CoordinatorError {
    CoordinatorError::WriteFailure(
        last.unwrap_or_else(|| std::io::Error::new(ErrorKind::AlreadyExists, "no free artifact name")),
    )
}

async fn write_partial<S, E>(file: File, mut content: S) -> CoordinatorResult<u64>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut out = BufWriter::new(file);
    let mut written = 0u64;
    while let Some(chunk) = content.next().await {
        let chunk = chunk.map_err(|e| CoordinatorError::PayloadInterrupted(e.to_string()))?;
        out.write_all(&chunk).await.map_err(CoordinatorError::WriteFailure)?;
        written += chunk.len() as u64;
    }
    out.flush().await.map_err(CoordinatorError::WriteFailure)?;
    out.into_inner().sync_all().await.map_err(CoordinatorError::WriteFailure)?;
    Ok(written)
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial upload");
        }
    }
}

/// `.ext` of the client-supplied name, or empty when absent or not plain alphanumerics.
fn extension_of(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .map(|e| format!(".{e}"))
        .unwrap_or_default()
}
