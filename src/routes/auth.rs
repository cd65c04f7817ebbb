use axum::extract::{Query, State};
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::app::AppState;
use crate::authz::{Action, PermissionDecision, UserPermissions};
use crate::errors::{AppError, AppResult};
use crate::events::audit;
use crate::jwt::{AuthUser, TokenSubject};
use crate::models::user::{AuthResponse, DbUser, LoginRequest, PasswordChangeRequest, User};
use crate::response::ApiResponse;
use crate::routes::users::{fetch_db_user, fetch_db_user_by_login, user_groups};
use crate::utils::{hash_password, utc_now, verify_password};
use crate::validation::{code_param, ValidJson, FUNCTION_CODE_LEN, SYSTEM_CODE_LEN};

#[derive(Debug, Clone, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CheckQuery {
    /// System code, e.g. `SEG`
    pub system: String,
    /// Function code, e.g. `SEG_USUARIOS`
    pub function: String,
    /// One of `A`, `C`, `E`, `I`
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionsResponse {
    pub permissions: UserPermissions,
    /// Compact `SYS|FUNC|ACEI|R` form of the same permissions.
    pub claims: Vec<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/permissions", get(permissions))
        .route("/check", get(check))
        .route("/password", put(change_password))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let db_user = fetch_db_user_by_login(&state.pool, &payload.login)
        .await?
        .filter(DbUser::is_usable)
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        tracing::info!(login = %payload.login, "login rejected");
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let now = utc_now();
    sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
        .bind(now)
        .bind(db_user.id)
        .execute(&state.pool)
        .await?;

    let groups = user_groups(&state.pool, db_user.id).await?;
    let mut user = db_user.into_user(groups);
    user.last_login_at = Some(now);

    let response = issue(&state, user).await?;
    audit(&state.event_bus, "login", Some(response.user.id), &response.user, None);

    Ok(ApiResponse::ok(response))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    tag = "Auth",
    responses(
        (status = 200, description = "Fresh token for the current user", body = AuthResponse),
        (status = 401, description = "User no longer active")
    ),
    security(("bearerAuth" = []))
)]
pub async fn refresh(State(state): State<AppState>, auth: AuthUser) -> AppResult<ApiResponse<AuthResponse>> {
    let user = current_user(&state, &auth).await?;
    let response = issue(&state, user).await?;
    Ok(ApiResponse::ok(response))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<ApiResponse<User>> {
    let user = current_user(&state, &auth).await?;
    Ok(ApiResponse::ok(user))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged")),
    security(("bearerAuth" = []))
)]
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> AppResult<ApiResponse<()>> {
    state.authz.cache().invalidate_user(auth.user_id).await;
    tracing::debug!(user_id = auth.user_id, "logged out");
    Ok(ApiResponse::message("logged out"))
}

#[utoipa::path(
    get,
    path = "/api/auth/permissions",
    tag = "Auth",
    responses((status = 200, description = "Aggregated permissions of the caller", body = PermissionsResponse)),
    security(("bearerAuth" = []))
)]
pub async fn permissions(State(state): State<AppState>, auth: AuthUser) -> AppResult<ApiResponse<PermissionsResponse>> {
    let permissions = state.authz.permissions(&auth).await?;
    Ok(ApiResponse::ok(PermissionsResponse {
        claims: permissions.to_claims(),
        permissions: (*permissions).clone(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/auth/check",
    tag = "Auth",
    params(CheckQuery),
    responses(
        (status = 200, description = "Decision for one action", body = PermissionDecision),
        (status = 422, description = "Malformed code or action")
    ),
    security(("bearerAuth" = []))
)]
pub async fn check(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<CheckQuery>,
) -> AppResult<ApiResponse<PermissionDecision>> {
    let system = code_param("system", &query.system, SYSTEM_CODE_LEN)?;
    let function = code_param("function", &query.function, FUNCTION_CODE_LEN)?;
    let action: Action = query
        .action
        .parse()
        .map_err(|message: String| AppError::invalid("action", message))?;

    let decision = state.authz.check(&auth, &system, &function, action).await?;
    Ok(ApiResponse::ok(decision))
}

#[utoipa::path(
    put,
    path = "/api/auth/password",
    tag = "Auth",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 422, description = "Current password wrong or new password too weak")
    ),
    security(("bearerAuth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(payload): ValidJson<PasswordChangeRequest>,
) -> AppResult<ApiResponse<()>> {
    let db_user = fetch_db_user(&state.pool, auth.user_id).await?;
    if !db_user.is_usable() {
        return Err(AppError::unauthorized("user is no longer active"));
    }

    if !verify_password(&payload.current_password, &db_user.password_hash)? {
        return Err(AppError::invalid("current_password", "is incorrect"));
    }

    let password_hash = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(utc_now())
        .bind(auth.user_id)
        .execute(&state.pool)
        .await?;

    let groups = user_groups(&state.pool, auth.user_id).await?;
    let user = db_user.into_user(groups);
    audit(&state.event_bus, "password_changed", Some(auth.user_id), &user, None);

    Ok(ApiResponse::message("password changed"))
}

/// Reloads the caller; a token outliving its user's deactivation is rejected.
async fn current_user(state: &AppState, auth: &AuthUser) -> AppResult<User> {
    let db_user = match fetch_db_user(&state.pool, auth.user_id).await {
        Ok(user) => user,
        Err(AppError::NotFound(_)) => return Err(AppError::unauthorized("user no longer exists")),
        Err(err) => return Err(err),
    };
    if !db_user.is_usable() {
        return Err(AppError::unauthorized("user is no longer active"));
    }

    let groups = user_groups(&state.pool, auth.user_id).await?;
    Ok(db_user.into_user(groups))
}

/// Signs a token and reloads permissions so a new session never sees stale grants.
async fn issue(state: &AppState, user: User) -> AppResult<AuthResponse> {
    let issued = state.jwt.encode(&TokenSubject {
        user_id: user.id,
        login: user.login.clone(),
        name: user.name.clone(),
        groups: user.groups.clone(),
    })?;

    let cache = state.authz.cache();
    cache.invalidate_user(user.id).await;
    let permissions = cache.for_user(user.id).await?;

    Ok(AuthResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user,
        permissions: (*permissions).clone(),
    })
}
