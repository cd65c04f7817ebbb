//! In-memory cache of aggregated permissions.
//!
//! Uses a `moka` async cache keyed by user id so a request does not re-read
//! and re-aggregate grant rows. A miss falls through to the
//! [`PermissionSource`]. Entries expire after the configured TTL and are
//! dropped eagerly when grants or memberships change. A load that overlaps
//! an invalidation is returned to its caller but never kept.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use super::{PermissionSource, UserPermissions};
use crate::errors::AppError;

#[derive(Clone)]
pub struct PermissionCache {
    cache: Cache<i64, Arc<UserPermissions>>,
    source: Arc<dyn PermissionSource>,
    /// Bumped before every invalidation.
    generation: Arc<AtomicU64>,
}

impl PermissionCache {
    pub fn new(source: Arc<dyn PermissionSource>, ttl: Duration, capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            source,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn for_user(&self, user_id: i64) -> Result<Arc<UserPermissions>, AppError> {
        if let Some(cached) = self.cache.get(&user_id).await {
            return Ok(cached);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let grants = self.source.grants_for_user(user_id).await?;
        let permissions = Arc::new(UserPermissions::aggregate(user_id, grants));
        tracing::debug!(
            user_id,
            systems = permissions.systems.len(),
            "permissions loaded"
        );

        // Insert first, then re-check: an invalidation that lands after the
        // check removes the entry itself.
        self.cache.insert(user_id, Arc::clone(&permissions)).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(user_id, "permissions invalidated during load, not cached");
            self.cache.invalidate(&user_id).await;
        }
        Ok(permissions)
    }

    pub async fn invalidate_user(&self, user_id: i64) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate(&user_id).await;
    }

    /// Grants are shared through groups, so a grant change can affect anyone.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate_all();
    }
}
