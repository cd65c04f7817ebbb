use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::codes::{AUDIT, SECURITY_SYSTEM};
use crate::authz::Action;
use crate::datatables::{DataTableQuery, DataTableResponse};
use crate::errors::AppResult;
use crate::events::{chain_hash, ChainedRow};
use crate::jwt::AuthUser;
use crate::models::audit::AuditEntry;
use crate::response::ApiResponse;

const ORDERABLE: &[&str] = &["seq", "occurred_at", "event_name", "subject", "severity", "actor_id"];
const AUDIT_COLUMNS: &str = "id, event_name, actor_id, subject, occurred_at, payload, severity, prev_hash, hash, seq";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainVerification {
    pub valid: bool,
    pub checked: i64,
    /// `seq` of the first entry whose hash or link does not match.
    pub broken_at: Option<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_audit))
        .route("/verify", get(verify_chain))
}

#[utoipa::path(
    get,
    path = "/api/audit",
    tag = "Audit",
    params(DataTableQuery),
    responses((status = 200, description = "DataTables page of audit entries, newest first by default")),
    security(("bearerAuth" = []))
)]
pub async fn list_audit(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<DataTableQuery>,
) -> AppResult<ApiResponse<DataTableResponse<AuditEntry>>> {
    state.authz.require(&auth, SECURITY_SYSTEM, AUDIT, Action::Consult).await?;
    let page = query.page();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM audit_log")
        .fetch_one(&state.pool)
        .await?;

    let filter = "WHERE (? IS NULL OR event_name LIKE ? ESCAPE '\\' OR subject LIKE ? ESCAPE '\\' OR severity LIKE ? ESCAPE '\\')";
    let filtered: i64 = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM audit_log {filter}"))
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .fetch_one(&state.pool)
        .await?;

    let order = match page.order_column {
        Some(_) => page.order_by(ORDERABLE),
        None => "ORDER BY seq DESC".to_string(),
    };
    let sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_log {filter} {order} LIMIT ? OFFSET ?");
    let entries = sqlx::query_as::<_, AuditEntry>(&sql)
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&state.pool)
        .await?;

    Ok(ApiResponse::ok(DataTableResponse::new(&page, total, filtered, entries)))
}

#[utoipa::path(
    get,
    path = "/api/audit/verify",
    tag = "Audit",
    responses((status = 200, description = "Result of re-hashing the whole chain", body = ChainVerification)),
    security(("bearerAuth" = []))
)]
pub async fn verify_chain(State(state): State<AppState>, auth: AuthUser) -> AppResult<ApiResponse<ChainVerification>> {
    state.authz.require(&auth, SECURITY_SYSTEM, AUDIT, Action::Consult).await?;

    let rows: Vec<ChainedRow> = sqlx::query_as(&format!("SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY seq"))
        .fetch_all(&state.pool)
        .await?;

    let mut previous: Option<String> = None;
    let mut checked = 0;
    for row in rows {
        if row.prev_hash != previous || chain_hash(&row) != row.hash {
            tracing::warn!(seq = row.seq, "audit chain broken");
            return Ok(ApiResponse::ok(ChainVerification {
                valid: false,
                checked,
                broken_at: Some(row.seq),
            }));
        }
        previous = Some(row.hash);
        checked += 1;
    }

    Ok(ApiResponse::ok(ChainVerification {
        valid: true,
        checked,
        broken_at: None,
    }))
}
