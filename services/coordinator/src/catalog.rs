//! Dataset shard enumeration.
//!
//! The catalog is queried fresh on every dispense so shards added or removed on
//! disk are visible on the next request.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CoordinatorError, CoordinatorResult};

#[async_trait]
pub trait ShardCatalog: Send + Sync {
    /// Current shard identifiers in rotation order.
    async fn list(&self) -> CoordinatorResult<Vec<String>>;

    /// Location of a shard returned by [`ShardCatalog::list`].
    fn resolve(&self, shard: &str) -> PathBuf;
}

/// Regular files in a single directory, sorted by name.
#[derive(Debug, Clone)]
pub struct DirCatalog {
    root: PathBuf,
}

impl DirCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ShardCatalog for DirCatalog {
    async fn list(&self) -> CoordinatorResult<Vec<String>> {
        list_visible_files(&self.root).await.map_err(CoordinatorError::CatalogUnavailable)
    }

    fn resolve(&self, shard: &str) -> PathBuf {
        self.root.join(shard)
    }
}

/// Sorted names of regular, non-hidden, UTF-8 named files in `dir`.
pub(crate) async fn list_visible_files(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            debug!(path = ?entry.path(), "skipping non-utf8 entry");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        // follows symlinks so linked shards are served
        match tokio::fs::metadata(entry.path()).await {
            Ok(meta) if meta.is_file() => names.push(name),
            Ok(_) => {}
            Err(e) => debug!(%name, error = %e, "skipping unreadable entry"),
        }
    }
    names.sort();
    Ok(names)
}
