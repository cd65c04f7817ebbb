//! Group administration.
//!
//! Groups own the ACEI grants. Every change here can alter the effective
//! permissions of any member, so each mutation drops the whole permission
//! cache and is audited with critical severity.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;

use crate::app::AppState;
use crate::authz::codes::{ADMIN_GROUP, GROUPS, SECURITY_SYSTEM};
use crate::authz::Action;
use crate::datatables::{DataTableQuery, DataTableResponse};
use crate::errors::{AppError, AppResult};
use crate::events::audit;
use crate::jwt::AuthUser;
use crate::models::group::{
    DbGroupPermission, GrantKey, Group, GroupCreateRequest, GroupPermission, GroupPermissionRequest, GroupUpdateRequest,
};
use crate::models::user::{DbUser, User};
use crate::response::ApiResponse;
use crate::routes::systems::conflict_on_duplicate;
use crate::routes::users::groups_by_user;
use crate::utils::utc_now;
use crate::validation::{code_param, ValidJson, GROUP_CODE_LEN};

const ORDERABLE: &[&str] = &["code", "name", "active", "created_at", "updated_at"];

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_groups).post(create_group))
        .route("/:code", get(get_group).put(update_group).delete(delete_group))
        .route("/:code/permissions", get(list_group_permissions))
        .route(
            "/:code/permissions/:system/:function",
            axum::routing::put(set_group_permission).delete(delete_group_permission),
        )
        .route("/:code/users", get(list_group_users))
}

// =============================================================================
// GROUP ENDPOINTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/groups",
    tag = "Groups",
    params(DataTableQuery),
    responses((status = 200, description = "DataTables page of groups")),
    security(("bearerAuth" = []))
)]
pub async fn list_groups(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<DataTableQuery>,
) -> AppResult<ApiResponse<DataTableResponse<Group>>> {
    state.authz.require(&auth, SECURITY_SYSTEM, GROUPS, Action::Consult).await?;
    let page = query.page();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM groups")
        .fetch_one(&state.pool)
        .await?;

    let filter = "WHERE (? IS NULL OR code LIKE ? ESCAPE '\\' OR name LIKE ? ESCAPE '\\')";
    let filtered: i64 = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM groups {filter}"))
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .fetch_one(&state.pool)
        .await?;

    let sql = format!(
        "SELECT code, name, active, created_at, updated_at FROM groups {filter} {} LIMIT ? OFFSET ?",
        page.order_by(ORDERABLE)
    );
    let groups = sqlx::query_as::<_, Group>(&sql)
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&state.pool)
        .await?;

    Ok(ApiResponse::ok(DataTableResponse::new(&page, total, filtered, groups)))
}

#[utoipa::path(
    get,
    path = "/api/groups/{code}",
    tag = "Groups",
    params(("code" = String, Path, description = "Group code")),
    responses((status = 200, description = "Group detail", body = Group), (status = 404, description = "Unknown group")),
    security(("bearerAuth" = []))
)]
pub async fn get_group(State(state): State<AppState>, auth: AuthUser, Path(code): Path<String>) -> AppResult<ApiResponse<Group>> {
    state.authz.require(&auth, SECURITY_SYSTEM, GROUPS, Action::Consult).await?;
    let code = code_param("code", &code, GROUP_CODE_LEN)?;
    let group = fetch_group(&state.pool, &code).await?;
    Ok(ApiResponse::ok(group))
}

#[utoipa::path(
    post,
    path = "/api/groups",
    tag = "Groups",
    request_body = GroupCreateRequest,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 409, description = "Code already in use")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(payload): ValidJson<GroupCreateRequest>,
) -> AppResult<ApiResponse<Group>> {
    state.authz.require(&auth, SECURITY_SYSTEM, GROUPS, Action::Include).await?;

    let now = utc_now();
    sqlx::query("INSERT INTO groups (code, name, active, created_at, updated_at) VALUES (?, ?, 1, ?, ?)")
        .bind(&payload.code)
        .bind(&payload.name)
        .bind(now)
        .bind(now)
        .execute(&state.pool)
        .await
        .map_err(|err| conflict_on_duplicate(err, format!("group '{}' already exists", payload.code)))?;

    let group = fetch_group(&state.pool, &payload.code).await?;
    audit(&state.event_bus, "created", Some(auth.user_id), &group, None);

    Ok(ApiResponse::created(group))
}

#[utoipa::path(
    put,
    path = "/api/groups/{code}",
    tag = "Groups",
    params(("code" = String, Path, description = "Group code")),
    request_body = GroupUpdateRequest,
    responses((status = 200, description = "Group updated", body = Group)),
    security(("bearerAuth" = []))
)]
pub async fn update_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
    ValidJson(payload): ValidJson<GroupUpdateRequest>,
) -> AppResult<ApiResponse<Group>> {
    state.authz.require(&auth, SECURITY_SYSTEM, GROUPS, Action::Alter).await?;
    let code = code_param("code", &code, GROUP_CODE_LEN)?;
    let old = fetch_group(&state.pool, &code).await?;

    let mut group = old.clone();
    if let Some(name) = payload.name {
        group.name = name;
    }
    if let Some(active) = payload.active {
        if !active && code == ADMIN_GROUP {
            return Err(AppError::conflict("the ADMIN group cannot be deactivated"));
        }
        group.active = active;
    }
    group.updated_at = utc_now();

    sqlx::query("UPDATE groups SET name = ?, active = ?, updated_at = ? WHERE code = ?")
        .bind(&group.name)
        .bind(group.active)
        .bind(group.updated_at)
        .bind(&code)
        .execute(&state.pool)
        .await?;

    state.authz.cache().invalidate_all();
    audit(&state.event_bus, "updated", Some(auth.user_id), &group, Some(&old));

    Ok(ApiResponse::ok(group))
}

#[utoipa::path(
    delete,
    path = "/api/groups/{code}",
    tag = "Groups",
    params(("code" = String, Path, description = "Group code")),
    responses(
        (status = 200, description = "Group, its grants and memberships deleted"),
        (status = 409, description = "Protected group")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_group(State(state): State<AppState>, auth: AuthUser, Path(code): Path<String>) -> AppResult<ApiResponse<()>> {
    state.authz.require(&auth, SECURITY_SYSTEM, GROUPS, Action::Exclude).await?;
    let code = code_param("code", &code, GROUP_CODE_LEN)?;
    if code == ADMIN_GROUP {
        return Err(AppError::conflict("the ADMIN group cannot be deleted"));
    }
    let group = fetch_group(&state.pool, &code).await?;

    // Grants and memberships cascade.
    sqlx::query("DELETE FROM groups WHERE code = ?")
        .bind(&code)
        .execute(&state.pool)
        .await?;

    state.authz.cache().invalidate_all();
    audit(&state.event_bus, "deleted", Some(auth.user_id), &group, None);

    Ok(ApiResponse::message(format!("group '{code}' deleted")))
}

// =============================================================================
// GRANT ENDPOINTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/groups/{code}/permissions",
    tag = "Groups",
    params(("code" = String, Path, description = "Group code")),
    responses((status = 200, description = "Grant rows of the group", body = [GroupPermission])),
    security(("bearerAuth" = []))
)]
pub async fn list_group_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
) -> AppResult<ApiResponse<Vec<GroupPermission>>> {
    state.authz.require(&auth, SECURITY_SYSTEM, GROUPS, Action::Consult).await?;
    let code = code_param("code", &code, GROUP_CODE_LEN)?;
    fetch_group(&state.pool, &code).await?;

    let rows = sqlx::query_as::<_, DbGroupPermission>(
        "SELECT group_code, system_code, function_code, actions, restriction, updated_at \
         FROM group_permissions WHERE group_code = ? ORDER BY system_code, function_code",
    )
    .bind(&code)
    .fetch_all(&state.pool)
    .await?;

    let grants = rows
        .into_iter()
        .map(GroupPermission::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ApiResponse::ok(grants))
}

#[utoipa::path(
    put,
    path = "/api/groups/{code}/permissions/{system}/{function}",
    tag = "Groups",
    params(
        ("code" = String, Path, description = "Group code"),
        ("system" = String, Path, description = "System code"),
        ("function" = String, Path, description = "Function code")
    ),
    request_body = GroupPermissionRequest,
    responses(
        (status = 200, description = "Grant stored", body = GroupPermission),
        (status = 404, description = "Unknown group or function"),
        (status = 422, description = "Invalid action string")
    ),
    security(("bearerAuth" = []))
)]
pub async fn set_group_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((code, system, function)): Path<(String, String, String)>,
    ValidJson(payload): ValidJson<GroupPermissionRequest>,
) -> AppResult<ApiResponse<GroupPermission>> {
    state.authz.require(&auth, SECURITY_SYSTEM, GROUPS, Action::Alter).await?;
    let key = GrantKey::parse(&code, &system, &function)?;
    fetch_group(&state.pool, &key.group_code).await?;

    let function_exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM functions WHERE system_code = ? AND code = ?")
        .bind(&key.system_code)
        .bind(&key.function_code)
        .fetch_one(&state.pool)
        .await?;
    if function_exists == 0 {
        return Err(AppError::not_found(format!(
            "function '{}/{}' not found",
            key.system_code, key.function_code
        )));
    }

    let old = fetch_grant(&state.pool, &key).await?;
    let grant = GroupPermission {
        group_code: key.group_code.clone(),
        system_code: key.system_code.clone(),
        function_code: key.function_code.clone(),
        actions: payload.action_set(),
        restriction: payload.restriction,
        updated_at: utc_now(),
    };

    sqlx::query(
        "INSERT INTO group_permissions (group_code, system_code, function_code, actions, restriction, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (group_code, system_code, function_code) \
         DO UPDATE SET actions = excluded.actions, restriction = excluded.restriction, updated_at = excluded.updated_at",
    )
    .bind(&grant.group_code)
    .bind(&grant.system_code)
    .bind(&grant.function_code)
    .bind(grant.actions.to_string())
    .bind(grant.restriction.to_string())
    .bind(grant.updated_at)
    .execute(&state.pool)
    .await?;

    state.authz.cache().invalidate_all();
    let action = if old.is_some() { "updated" } else { "created" };
    tracing::info!(
        group = %grant.group_code,
        system = %grant.system_code,
        function = %grant.function_code,
        actions = %grant.actions,
        restriction = %grant.restriction,
        "grant {action}"
    );
    audit(&state.event_bus, action, Some(auth.user_id), &grant, old.as_ref());

    Ok(ApiResponse::ok(grant))
}

#[utoipa::path(
    delete,
    path = "/api/groups/{code}/permissions/{system}/{function}",
    tag = "Groups",
    params(
        ("code" = String, Path, description = "Group code"),
        ("system" = String, Path, description = "System code"),
        ("function" = String, Path, description = "Function code")
    ),
    responses((status = 200, description = "Grant removed"), (status = 404, description = "No such grant")),
    security(("bearerAuth" = []))
)]
pub async fn delete_group_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((code, system, function)): Path<(String, String, String)>,
) -> AppResult<ApiResponse<()>> {
    state.authz.require(&auth, SECURITY_SYSTEM, GROUPS, Action::Exclude).await?;
    let key = GrantKey::parse(&code, &system, &function)?;

    let grant = fetch_grant(&state.pool, &key)
        .await?
        .ok_or_else(|| AppError::not_found("grant not found"))?;

    sqlx::query("DELETE FROM group_permissions WHERE group_code = ? AND system_code = ? AND function_code = ?")
        .bind(&key.group_code)
        .bind(&key.system_code)
        .bind(&key.function_code)
        .execute(&state.pool)
        .await?;

    state.authz.cache().invalidate_all();
    audit(&state.event_bus, "deleted", Some(auth.user_id), &grant, None);

    Ok(ApiResponse::message("grant removed"))
}

// =============================================================================
// MEMBERS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/groups/{code}/users",
    tag = "Groups",
    params(("code" = String, Path, description = "Group code")),
    responses((status = 200, description = "Active members of the group", body = [User])),
    security(("bearerAuth" = []))
)]
pub async fn list_group_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
) -> AppResult<ApiResponse<Vec<User>>> {
    state.authz.require(&auth, SECURITY_SYSTEM, GROUPS, Action::Consult).await?;
    let code = code_param("code", &code, GROUP_CODE_LEN)?;
    fetch_group(&state.pool, &code).await?;

    let rows = sqlx::query_as::<_, DbUser>(
        "SELECT u.id, u.login, u.name, u.email, u.password_hash, u.active, u.created_at, u.updated_at, u.deleted_at, u.last_login_at \
         FROM users u INNER JOIN user_groups ug ON ug.user_id = u.id \
         WHERE ug.group_code = ? AND u.active = 1 AND u.deleted_at IS NULL ORDER BY u.login",
    )
    .bind(&code)
    .fetch_all(&state.pool)
    .await?;

    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    let mut groups = groups_by_user(&state.pool, &ids).await?;
    let users = rows
        .into_iter()
        .map(|row| {
            let user_groups = groups.remove(&row.id).unwrap_or_default();
            row.into_user(user_groups)
        })
        .collect();

    Ok(ApiResponse::ok(users))
}

async fn fetch_group(pool: &SqlitePool, code: &str) -> AppResult<Group> {
    sqlx::query_as::<_, Group>("SELECT code, name, active, created_at, updated_at FROM groups WHERE code = ?")
        .bind(code)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("group '{code}' not found")))
}

async fn fetch_grant(pool: &SqlitePool, key: &GrantKey) -> AppResult<Option<GroupPermission>> {
    sqlx::query_as::<_, DbGroupPermission>(
        "SELECT group_code, system_code, function_code, actions, restriction, updated_at \
         FROM group_permissions WHERE group_code = ? AND system_code = ? AND function_code = ?",
    )
    .bind(&key.group_code)
    .bind(&key.system_code)
    .bind(&key.function_code)
    .fetch_optional(pool)
    .await?
    .map(GroupPermission::try_from)
    .transpose()
}
