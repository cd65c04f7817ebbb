use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::{ApiClient, ClientResult};
use crate::authz::UserPermissions;
use crate::models::user::AuthResponse;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct Cached {
    permissions: Arc<UserPermissions>,
    loaded_at: Instant,
}

/// Client-side copy of the caller's aggregated permissions.
///
/// Entries expire after `ttl`; the next read reloads them from the server.
/// Grant changes made elsewhere become visible after expiry or an explicit
/// [`invalidate`](Self::invalidate).
#[derive(Debug, Clone)]
pub struct PermissionSession {
    ttl: Duration,
    state: Arc<RwLock<Option<Cached>>>,
}

impl Default for PermissionSession {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl PermissionSession {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Arc::new(RwLock::new(None)),
        }
    }

    /// Seeds the session with the permissions returned by a login.
    pub async fn start(&self, auth: &AuthResponse) {
        self.store(auth.permissions.clone()).await;
    }

    /// Restores a session from the compact `SYS|FUNC|ACEI|R` claims.
    pub async fn restore(&self, user_id: i64, claims: &[String]) -> Result<(), String> {
        let permissions = UserPermissions::from_claims(user_id, claims)?;
        self.store(permissions).await;
        Ok(())
    }

    pub async fn store(&self, permissions: UserPermissions) -> Arc<UserPermissions> {
        let permissions = Arc::new(permissions);
        *self.state.write().await = Some(Cached {
            permissions: Arc::clone(&permissions),
            loaded_at: Instant::now(),
        });
        permissions
    }

    /// Fresh cached permissions, if any.
    pub async fn cached(&self) -> Option<Arc<UserPermissions>> {
        let state = self.state.read().await;
        state
            .as_ref()
            .filter(|cached| cached.loaded_at.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.permissions))
    }

    pub async fn invalidate(&self) {
        *self.state.write().await = None;
    }

    /// Cached permissions, or the server's current view when stale.
    pub async fn permissions(&self, client: &ApiClient) -> ClientResult<Arc<UserPermissions>> {
        self.get_or_load(|| client.permissions()).await
    }

    pub async fn get_or_load<F, Fut, E>(&self, load: F) -> Result<Arc<UserPermissions>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<UserPermissions, E>>,
    {
        if let Some(permissions) = self.cached().await {
            return Ok(permissions);
        }

        let permissions = load().await?;
        tracing::debug!(user_id = permissions.user_id, "permission session reloaded");
        Ok(self.store(permissions).await)
    }
}
