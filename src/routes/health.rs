use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use sqlx::query_scalar;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::response::ApiResponse;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub db_ok: bool,
    pub db_error: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<ApiResponse<HealthResponse>> {
    // Lightweight DB check; a failing database still answers 200 so monitors can read the detail.
    let db_check = query_scalar::<_, i64>("SELECT 1").fetch_one(&state.pool).await;

    let response = match db_check {
        Ok(_) => HealthResponse {
            status: "ok".to_string(),
            db_ok: true,
            db_error: None,
        },
        Err(err) => {
            tracing::warn!(error = %err, "health check could not reach the database");
            HealthResponse {
                status: "degraded".to_string(),
                db_ok: false,
                db_error: Some(err.to_string()),
            }
        }
    };

    Ok(ApiResponse::ok(response))
}
