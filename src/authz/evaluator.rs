use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Action, AuthzMode, PermissionCache, Restriction, UserPermissions};
use crate::errors::AppError;
use crate::jwt::AuthUser;

/// Outcome of a single permission check.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    /// Restriction the caller holds on the function, if any access at all.
    pub restriction: Option<Restriction>,
}

impl PermissionDecision {
    pub fn evaluate(permissions: &UserPermissions, system: &str, function: &str, action: Action) -> Self {
        Self {
            allowed: permissions.can(system, function, action),
            restriction: permissions.restriction(system, function),
        }
    }
}

/// Applies the enforcement mode on top of the cached permissions.
///
/// Evaluation order:
/// 1. load (cached) aggregated permissions of the caller
/// 2. action letter present on (system, function) -> allow
/// 3. otherwise by mode: off -> allow, advisory -> log and allow, strict -> 403
#[derive(Clone)]
pub struct Authorizer {
    cache: PermissionCache,
    mode: AuthzMode,
}

impl Authorizer {
    pub fn new(cache: PermissionCache, mode: AuthzMode) -> Self {
        Self { cache, mode }
    }

    pub fn mode(&self) -> AuthzMode {
        self.mode
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    pub async fn permissions(&self, auth: &AuthUser) -> Result<Arc<UserPermissions>, AppError> {
        self.cache.for_user(auth.user_id).await
    }

    pub async fn check(
        &self,
        auth: &AuthUser,
        system: &str,
        function: &str,
        action: Action,
    ) -> Result<PermissionDecision, AppError> {
        let permissions = self.permissions(auth).await?;
        Ok(PermissionDecision::evaluate(&permissions, system, function, action))
    }

    /// Fails with 403 in strict mode when the caller lacks `action`; returns
    /// the caller's permissions so handlers can read the restriction level.
    pub async fn require(
        &self,
        auth: &AuthUser,
        system: &str,
        function: &str,
        action: Action,
    ) -> Result<Arc<UserPermissions>, AppError> {
        let permissions = self.permissions(auth).await?;

        if permissions.can(system, function, action) {
            tracing::debug!(
                user_id = auth.user_id,
                system,
                function,
                action = %action,
                "permission granted"
            );
            return Ok(permissions);
        }

        match self.mode {
            AuthzMode::Off => Ok(permissions),
            AuthzMode::Advisory => {
                tracing::warn!(
                    user_id = auth.user_id,
                    system,
                    function,
                    action = %action,
                    "permission missing (advisory mode, allowing)"
                );
                Ok(permissions)
            }
            AuthzMode::Strict => {
                tracing::debug!(
                    user_id = auth.user_id,
                    system,
                    function,
                    action = %action,
                    "permission denied"
                );
                Err(AppError::forbidden(format!(
                    "action '{}' not granted on {}/{}",
                    action, system, function
                )))
            }
        }
    }

    /// Like [`Authorizer::require`] but any action on the function suffices.
    pub async fn require_any(
        &self,
        auth: &AuthUser,
        system: &str,
        function: &str,
    ) -> Result<Arc<UserPermissions>, AppError> {
        let permissions = self.permissions(auth).await?;
        if permissions.access(system, function).is_some() {
            return Ok(permissions);
        }

        match self.mode {
            AuthzMode::Off => Ok(permissions),
            AuthzMode::Advisory => {
                tracing::warn!(
                    user_id = auth.user_id,
                    system,
                    function,
                    "function access missing (advisory mode, allowing)"
                );
                Ok(permissions)
            }
            AuthzMode::Strict => {
                tracing::debug!(user_id = auth.user_id, system, function, "function access denied");
                Err(AppError::forbidden(format!("no access to {}/{}", system, function)))
            }
        }
    }
}
