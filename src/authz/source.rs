use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use super::PermissionGrant;
use crate::errors::AppError;

/// Where the grant rows of a user come from.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn grants_for_user(&self, user_id: i64) -> Result<Vec<PermissionGrant>, AppError>;
}

#[derive(Debug, FromRow)]
struct GrantRow {
    group_code: String,
    system_code: String,
    function_code: String,
    actions: String,
    restriction: String,
}

impl TryFrom<GrantRow> for PermissionGrant {
    type Error = AppError;

    fn try_from(row: GrantRow) -> Result<Self, Self::Error> {
        let actions = row
            .actions
            .parse()
            .map_err(|err| AppError::internal(format!("grant {}/{}: {err}", row.group_code, row.function_code)))?;
        let restriction = row
            .restriction
            .parse()
            .map_err(|err| AppError::internal(format!("grant {}/{}: {err}", row.group_code, row.function_code)))?;

        Ok(PermissionGrant {
            group_code: row.group_code,
            system_code: row.system_code,
            function_code: row.function_code,
            actions,
            restriction,
        })
    }
}

/// Reads grants through the user's active groups; inactive systems grant nothing.
#[derive(Debug, Clone)]
pub struct SqlitePermissionSource {
    pool: SqlitePool,
}

impl SqlitePermissionSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionSource for SqlitePermissionSource {
    async fn grants_for_user(&self, user_id: i64) -> Result<Vec<PermissionGrant>, AppError> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT gp.group_code, gp.system_code, gp.function_code, gp.actions, gp.restriction
            FROM group_permissions gp
            INNER JOIN user_groups ug ON ug.group_code = gp.group_code
            INNER JOIN groups g ON g.code = gp.group_code
            INNER JOIN systems s ON s.code = gp.system_code
            INNER JOIN users u ON u.id = ug.user_id
            WHERE ug.user_id = ?
              AND g.active = 1
              AND s.active = 1
              AND u.active = 1
              AND u.deleted_at IS NULL
            ORDER BY gp.system_code, gp.function_code, gp.group_code
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PermissionGrant::try_from).collect()
    }
}
