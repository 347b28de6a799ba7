//! Round-robin shard rotation.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::ShardCatalog;
use crate::error::{CoordinatorError, CoordinatorResult};

/// Hands out shards from a [`ShardCatalog`] in rotation.
///
/// The cursor is only meaningful modulo the listing captured by each call, so
/// shard count is never cached. The lock covers the cursor arithmetic alone;
/// the catalog read happens before it is taken.
pub struct RoundRobinDispenser<C> {
    catalog: Arc<C>,
    cursor: Mutex<u64>,
}

impl<C: ShardCatalog> RoundRobinDispenser<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self::with_cursor(catalog, 0)
    }

    pub fn with_cursor(catalog: Arc<C>, start: u64) -> Self {
        Self { catalog, cursor: Mutex::new(start) }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn cursor(&self) -> u64 {
        *self.cursor.lock()
    }

    /// Next shard in rotation. Failed calls leave the cursor untouched.
    pub async fn next(&self) -> CoordinatorResult<String> {
        let mut listing = self.catalog.list().await?;
        if listing.is_empty() {
            return Err(CoordinatorError::NoShardsAvailable);
        }
        let (index, cursor) = {
            let mut cursor = self.cursor.lock();
            let current = *cursor;
            *cursor = current.wrapping_add(1);
            ((current % listing.len() as u64) as usize, current)
        };
        debug!(cursor, index, shards = listing.len(), "dispense");
        Ok(listing.swap_remove(index))
    }
}
