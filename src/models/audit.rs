use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct AuditEntry {
    pub id: String,
    #[schema(example = "group_permission.updated")]
    pub event_name: String,
    pub actor_id: Option<i64>,
    pub subject: String,
    pub occurred_at: DateTime<Utc>,
    /// JSON document with `new` and, for changes, `old`.
    pub payload: String,
    pub severity: String,
    pub prev_hash: Option<String>,
    pub hash: String,
    pub seq: i64,
}
