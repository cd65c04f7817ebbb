use std::sync::Arc;

use axum::http::{HeaderName, Method};
use axum::middleware;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{Authorizer, PermissionCache, SqlitePermissionSource};
use crate::config::AppConfig;
use crate::db::seed;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_audit_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::response::{trace_id_middleware, TRACE_HEADER};
use crate::routes::{audit, auth, buttons, groups, health, systems, users};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub authz: Authorizer,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: &AppConfig, event_bus: EventBus) -> Self {
        let source = Arc::new(SqlitePermissionSource::new(pool.clone()));
        let cache = PermissionCache::new(source, config.permission_cache_ttl, config.permission_cache_capacity);

        Self {
            pool,
            jwt: Arc::new(config.jwt.clone()),
            authz: Authorizer::new(cache, config.authz_mode),
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let config = AppConfig::from_env()?;
    create_app_with_config(pool, config).await
}

/// Builds the router; also starts the audit listener and seeds the first
/// administrator when configured.
pub async fn create_app_with_config(pool: SqlitePool, config: AppConfig) -> Result<Router, AppError> {
    let (event_bus, audit_rx) = init_event_bus();
    tokio::spawn(start_audit_listener(audit_rx, pool.clone()));

    if let Some(admin) = &config.bootstrap_admin {
        if let Some(user_id) = seed::bootstrap_admin(&pool, &admin.login, &admin.password).await? {
            tracing::info!(user_id, "bootstrap administrator created");
        }
    }

    tracing::info!(mode = ?config.authz_mode, "authorization configured");
    let state = AppState::new(pool, &config, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(TRACE_HEADER)]);

    let api = Router::new()
        .merge(health::routes())
        .nest("/auth", auth::routes())
        .nest("/systems", systems::routes())
        .nest("/users", users::routes())
        .nest("/buttons", buttons::routes())
        .nest("/groups", groups::routes())
        .nest("/audit", audit::routes());

    let router = Router::new()
        .nest("/api", api)
        .with_state(state)
        .layer(middleware::from_fn(trace_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
