use axum::extract::{Path, Query, State};
use axum::routing::{delete, get};
use axum::Router;
use sqlx::SqlitePool;

use crate::app::AppState;
use crate::authz::codes::{SECURITY_SYSTEM, SYSTEMS};
use crate::authz::Action;
use crate::datatables::{DataTableQuery, DataTableResponse};
use crate::errors::{AppError, AppResult};
use crate::events::audit;
use crate::jwt::AuthUser;
use crate::models::system::{FunctionCreateRequest, System, SystemCreateRequest, SystemFunction, SystemUpdateRequest};
use crate::response::ApiResponse;
use crate::utils::utc_now;
use crate::validation::{code_param, ValidJson, FUNCTION_CODE_LEN, SYSTEM_CODE_LEN};

const ORDERABLE: &[&str] = &["code", "name", "active", "created_at", "updated_at"];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_systems).post(create_system))
        .route("/:code", get(get_system).put(update_system).delete(delete_system))
        .route("/:code/functions", get(list_functions).post(create_function))
        .route("/:code/functions/:function", delete(delete_function))
}

#[utoipa::path(
    get,
    path = "/api/systems",
    tag = "Systems",
    params(DataTableQuery),
    responses((status = 200, description = "DataTables page of systems")),
    security(("bearerAuth" = []))
)]
pub async fn list_systems(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<DataTableQuery>,
) -> AppResult<ApiResponse<DataTableResponse<System>>> {
    state.authz.require(&auth, SECURITY_SYSTEM, SYSTEMS, Action::Consult).await?;
    let page = query.page();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM systems")
        .fetch_one(&state.pool)
        .await?;

    let filter = "WHERE (? IS NULL OR code LIKE ? ESCAPE '\\' OR name LIKE ? ESCAPE '\\')";
    let filtered: i64 = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM systems {filter}"))
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .fetch_one(&state.pool)
        .await?;

    let sql = format!(
        "SELECT code, name, description, active, created_at, updated_at FROM systems {filter} {} LIMIT ? OFFSET ?",
        page.order_by(ORDERABLE)
    );
    let systems = sqlx::query_as::<_, System>(&sql)
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&state.pool)
        .await?;

    Ok(ApiResponse::ok(DataTableResponse::new(&page, total, filtered, systems)))
}

#[utoipa::path(
    get,
    path = "/api/systems/{code}",
    tag = "Systems",
    params(("code" = String, Path, description = "System code")),
    responses((status = 200, description = "System detail", body = System), (status = 404, description = "Unknown system")),
    security(("bearerAuth" = []))
)]
pub async fn get_system(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
) -> AppResult<ApiResponse<System>> {
    state.authz.require(&auth, SECURITY_SYSTEM, SYSTEMS, Action::Consult).await?;
    let code = code_param("code", &code, SYSTEM_CODE_LEN)?;
    let system = fetch_system(&state.pool, &code).await?;
    Ok(ApiResponse::ok(system))
}

#[utoipa::path(
    post,
    path = "/api/systems",
    tag = "Systems",
    request_body = SystemCreateRequest,
    responses(
        (status = 201, description = "System created", body = System),
        (status = 409, description = "Code already in use"),
        (status = 422, description = "Validation failed")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_system(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(payload): ValidJson<SystemCreateRequest>,
) -> AppResult<ApiResponse<System>> {
    state.authz.require(&auth, SECURITY_SYSTEM, SYSTEMS, Action::Include).await?;

    let now = utc_now();
    sqlx::query(
        "INSERT INTO systems (code, name, description, active, created_at, updated_at) VALUES (?, ?, ?, 1, ?, ?)",
    )
    .bind(&payload.code)
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(|err| conflict_on_duplicate(err, format!("system '{}' already exists", payload.code)))?;

    let system = fetch_system(&state.pool, &payload.code).await?;
    audit(&state.event_bus, "created", Some(auth.user_id), &system, None);

    Ok(ApiResponse::created(system))
}

#[utoipa::path(
    put,
    path = "/api/systems/{code}",
    tag = "Systems",
    params(("code" = String, Path, description = "System code")),
    request_body = SystemUpdateRequest,
    responses(
        (status = 200, description = "System updated", body = System),
        (status = 409, description = "Security system cannot be deactivated")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_system(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
    ValidJson(payload): ValidJson<SystemUpdateRequest>,
) -> AppResult<ApiResponse<System>> {
    state.authz.require(&auth, SECURITY_SYSTEM, SYSTEMS, Action::Alter).await?;
    let code = code_param("code", &code, SYSTEM_CODE_LEN)?;
    let old = fetch_system(&state.pool, &code).await?;

    let mut system = old.clone();
    if let Some(name) = payload.name {
        system.name = name;
    }
    if payload.description.is_some() {
        system.description = payload.description;
    }
    if let Some(active) = payload.active {
        if !active && code == SECURITY_SYSTEM {
            return Err(AppError::conflict("the security system cannot be deactivated"));
        }
        system.active = active;
    }
    system.updated_at = utc_now();

    sqlx::query("UPDATE systems SET name = ?, description = ?, active = ?, updated_at = ? WHERE code = ?")
        .bind(&system.name)
        .bind(&system.description)
        .bind(system.active)
        .bind(system.updated_at)
        .bind(&code)
        .execute(&state.pool)
        .await?;

    // Inactive systems grant nothing, so toggling one changes everybody's permissions.
    if system.active != old.active {
        state.authz.cache().invalidate_all();
    }
    audit(&state.event_bus, "updated", Some(auth.user_id), &system, Some(&old));

    Ok(ApiResponse::ok(system))
}

#[utoipa::path(
    delete,
    path = "/api/systems/{code}",
    tag = "Systems",
    params(("code" = String, Path, description = "System code")),
    responses(
        (status = 200, description = "System and its functions deleted"),
        (status = 409, description = "Security system, or still referenced by buttons or grants")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_system(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
) -> AppResult<ApiResponse<()>> {
    state.authz.require(&auth, SECURITY_SYSTEM, SYSTEMS, Action::Exclude).await?;
    let code = code_param("code", &code, SYSTEM_CODE_LEN)?;
    let system = fetch_system(&state.pool, &code).await?;
    if system.code == SECURITY_SYSTEM {
        return Err(AppError::conflict("the security system cannot be deleted"));
    }

    let mut tx = state.pool.begin().await?;

    // Writing first takes the lock before the reference counts are read.
    sqlx::query(
        "DELETE FROM functions WHERE system_code = ? \
         AND NOT EXISTS (SELECT 1 FROM buttons b WHERE b.system_code = functions.system_code AND b.function_code = functions.code) \
         AND NOT EXISTS (SELECT 1 FROM group_permissions gp WHERE gp.system_code = functions.system_code AND gp.function_code = functions.code)",
    )
    .bind(&code)
    .execute(&mut *tx)
    .await?;

    let (buttons, grants): (i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(1) FROM buttons WHERE system_code = ?), (SELECT COUNT(1) FROM group_permissions WHERE system_code = ?)",
    )
    .bind(&code)
    .bind(&code)
    .fetch_one(&mut *tx)
    .await?;
    if buttons > 0 || grants > 0 {
        return Err(AppError::conflict(format!(
            "system '{code}' is still referenced by {buttons} button(s) and {grants} grant(s)"
        )));
    }

    sqlx::query("DELETE FROM systems WHERE code = ?")
        .bind(&code)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state.event_bus, "deleted", Some(auth.user_id), &system, None);
    Ok(ApiResponse::message(format!("system '{code}' deleted")))
}

#[utoipa::path(
    get,
    path = "/api/systems/{code}/functions",
    tag = "Systems",
    params(("code" = String, Path, description = "System code")),
    responses((status = 200, description = "Functions of the system", body = [SystemFunction])),
    security(("bearerAuth" = []))
)]
pub async fn list_functions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
) -> AppResult<ApiResponse<Vec<SystemFunction>>> {
    state.authz.require(&auth, SECURITY_SYSTEM, SYSTEMS, Action::Consult).await?;
    let code = code_param("code", &code, SYSTEM_CODE_LEN)?;
    fetch_system(&state.pool, &code).await?;

    let functions = sqlx::query_as::<_, SystemFunction>(
        "SELECT system_code, code, name, created_at FROM functions WHERE system_code = ? ORDER BY code",
    )
    .bind(&code)
    .fetch_all(&state.pool)
    .await?;

    Ok(ApiResponse::ok(functions))
}

#[utoipa::path(
    post,
    path = "/api/systems/{code}/functions",
    tag = "Systems",
    params(("code" = String, Path, description = "System code")),
    request_body = FunctionCreateRequest,
    responses(
        (status = 201, description = "Function created", body = SystemFunction),
        (status = 409, description = "Function already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_function(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
    ValidJson(payload): ValidJson<FunctionCreateRequest>,
) -> AppResult<ApiResponse<SystemFunction>> {
    state.authz.require(&auth, SECURITY_SYSTEM, SYSTEMS, Action::Include).await?;
    let code = code_param("code", &code, SYSTEM_CODE_LEN)?;
    fetch_system(&state.pool, &code).await?;

    let function = SystemFunction {
        system_code: code,
        code: payload.code,
        name: payload.name,
        created_at: utc_now(),
    };

    sqlx::query("INSERT INTO functions (system_code, code, name, created_at) VALUES (?, ?, ?, ?)")
        .bind(&function.system_code)
        .bind(&function.code)
        .bind(&function.name)
        .bind(function.created_at)
        .execute(&state.pool)
        .await
        .map_err(|err| {
            conflict_on_duplicate(
                err,
                format!("function '{}' already exists in '{}'", function.code, function.system_code),
            )
        })?;

    audit(&state.event_bus, "created", Some(auth.user_id), &function, None);
    Ok(ApiResponse::created(function))
}

#[utoipa::path(
    delete,
    path = "/api/systems/{code}/functions/{function}",
    tag = "Systems",
    params(
        ("code" = String, Path, description = "System code"),
        ("function" = String, Path, description = "Function code")
    ),
    responses(
        (status = 200, description = "Function deleted"),
        (status = 409, description = "Security system, or still referenced by buttons or grants")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_function(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((code, function)): Path<(String, String)>,
) -> AppResult<ApiResponse<()>> {
    state.authz.require(&auth, SECURITY_SYSTEM, SYSTEMS, Action::Exclude).await?;
    let code = code_param("code", &code, SYSTEM_CODE_LEN)?;
    let function = code_param("function", &function, FUNCTION_CODE_LEN)?;

    let existing = sqlx::query_as::<_, SystemFunction>(
        "SELECT system_code, code, name, created_at FROM functions WHERE system_code = ? AND code = ?",
    )
    .bind(&code)
    .bind(&function)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found(format!("function '{code}/{function}' not found")))?;

    let (buttons, grants): (i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(1) FROM buttons WHERE system_code = ? AND function_code = ?), \
                (SELECT COUNT(1) FROM group_permissions WHERE system_code = ? AND function_code = ?)",
    )
    .bind(&code)
    .bind(&function)
    .bind(&code)
    .bind(&function)
    .fetch_one(&state.pool)
    .await?;
    if buttons > 0 || grants > 0 {
        return Err(AppError::conflict(format!(
            "function '{code}/{function}' is still referenced by {buttons} button(s) and {grants} grant(s)"
        )));
    }

    // FK RESTRICT covers a reference added between the check and the delete.
    sqlx::query("DELETE FROM functions WHERE system_code = ? AND code = ?")
        .bind(&code)
        .bind(&function)
        .execute(&state.pool)
        .await?;

    audit(&state.event_bus, "deleted", Some(auth.user_id), &existing, None);
    Ok(ApiResponse::message(format!("function '{code}/{function}' deleted")))
}

pub(crate) async fn fetch_system(pool: &SqlitePool, code: &str) -> AppResult<System> {
    sqlx::query_as::<_, System>(
        "SELECT code, name, description, active, created_at, updated_at FROM systems WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found(format!("system '{code}' not found")))
}

/// Unique violations get a message naming the duplicate; anything else maps as usual.
pub(crate) fn conflict_on_duplicate(err: sqlx::Error, message: String) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::conflict(message),
        _ => AppError::from(err),
    }
}
