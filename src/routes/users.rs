use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::Router;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

use crate::app::AppState;
use crate::authz::codes::{GROUPS, SECURITY_SYSTEM, USERS};
use crate::authz::{Action, AuthzMode, Restriction};
use crate::datatables::{DataTableQuery, DataTableResponse};
use crate::errors::{AppError, AppResult};
use crate::events::audit;
use crate::jwt::AuthUser;
use crate::models::user::{
    DbUser, PasswordResetRequest, User, UserCreateRequest, UserGroupsRequest, UserMembership, UserUpdateRequest,
};
use crate::response::ApiResponse;
use crate::utils::{hash_password, utc_now};
use crate::validation::ValidJson;

const USER_COLUMNS: &str =
    "u.id, u.login, u.name, u.email, u.password_hash, u.active, u.created_at, u.updated_at, u.deleted_at, u.last_login_at";
const ORDERABLE: &[&str] = &["u.login", "u.name", "u.email", "u.active", "u.created_at", "u.last_login_at"];

/// Rows the caller may see given their restriction on the users function:
/// L everything, P users sharing a group with the caller, C only the caller.
/// Binds: restriction letter, caller id, restriction letter, caller id.
const VISIBLE: &str = "(? = 'L' OR u.id = ? OR (? = 'P' AND u.id IN (\
    SELECT peer.user_id FROM user_groups peer \
    INNER JOIN user_groups own ON own.group_code = peer.group_code \
    WHERE own.user_id = ?)))";

#[derive(Debug, Clone, Copy)]
struct Scope {
    caller: i64,
    restriction: Restriction,
}

impl Scope {
    fn letter(&self) -> String {
        self.restriction.letter().to_string()
    }

    fn bind<'q, O>(
        &self,
        query: sqlx::query::QueryAs<'q, Sqlite, O, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> sqlx::query::QueryAs<'q, Sqlite, O, sqlx::sqlite::SqliteArguments<'q>> {
        query
            .bind(self.letter())
            .bind(self.caller)
            .bind(self.letter())
            .bind(self.caller)
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
        .route("/:id/password", post(reset_password))
        .route("/:id/groups", put(set_user_groups))
}

async fn scope_for(state: &AppState, auth: &AuthUser, action: Action) -> AppResult<Scope> {
    let permissions = state.authz.require(auth, SECURITY_SYSTEM, USERS, action).await?;
    // Off/advisory modes may let a caller without a grant through; they see everything.
    let restriction = permissions.restriction(SECURITY_SYSTEM, USERS).unwrap_or_default();
    Ok(Scope {
        caller: auth.user_id,
        restriction,
    })
}

/// Callers without `A` on the groups function may only hand out groups
/// they belong to themselves.
async fn ensure_assignable(state: &AppState, auth: &AuthUser, added: &[String]) -> AppResult<()> {
    if added.is_empty() || state.authz.mode() == AuthzMode::Off {
        return Ok(());
    }
    let decision = state.authz.check(auth, SECURITY_SYSTEM, GROUPS, Action::Alter).await?;
    if decision.allowed {
        return Ok(());
    }

    let own = user_groups(&state.pool, auth.user_id).await?;
    let Some(foreign) = added.iter().find(|group| !own.contains(*group)) else {
        return Ok(());
    };
    if state.authz.mode() == AuthzMode::Advisory {
        tracing::warn!(user_id = auth.user_id, group = %foreign, "assigning a foreign group (advisory mode, allowing)");
        return Ok(());
    }
    Err(AppError::forbidden(format!(
        "group '{foreign}' can only be assigned by its members or group administrators"
    )))
}

#[utoipa::path(
    get,
    path = "/api/users",
    tag = "Users",
    params(DataTableQuery),
    responses(
        (status = 200, description = "DataTables page of users visible to the caller"),
        (status = 403, description = "Missing C on SEG/SEG_USUARIOS")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<DataTableQuery>,
) -> AppResult<ApiResponse<DataTableResponse<User>>> {
    let scope = scope_for(&state, &auth, Action::Consult).await?;
    let page = query.page();

    let (total,): (i64,) = scope
        .bind(sqlx::query_as::<_, (i64,)>(&format!(
            "SELECT COUNT(1) FROM users u WHERE u.deleted_at IS NULL AND {VISIBLE}"
        )))
        .fetch_one(&state.pool)
        .await?;

    let filter = "(? IS NULL OR u.login LIKE ? ESCAPE '\\' OR u.name LIKE ? ESCAPE '\\' OR u.email LIKE ? ESCAPE '\\')";

    let (filtered,): (i64,) = scope
        .bind(sqlx::query_as::<_, (i64,)>(&format!(
            "SELECT COUNT(1) FROM users u WHERE u.deleted_at IS NULL AND {VISIBLE} AND {filter}"
        )))
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .fetch_one(&state.pool)
        .await?;

    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users u WHERE u.deleted_at IS NULL AND {VISIBLE} AND {filter} {} LIMIT ? OFFSET ?",
        page.order_by(ORDERABLE)
    );
    let rows: Vec<DbUser> = scope
        .bind(sqlx::query_as::<_, DbUser>(&sql))
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .bind(page.limit)
        .bind(page.offset)
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

    Ok(ApiResponse::ok(DataTableResponse::new(&page, total, filtered, users)))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = i64, Path, description = "User id")),
    responses((status = 200, description = "User detail", body = User), (status = 404, description = "Not found or not visible")),
    security(("bearerAuth" = []))
)]
pub async fn get_user(State(state): State<AppState>, auth: AuthUser, Path(id): Path<i64>) -> AppResult<ApiResponse<User>> {
    let scope = scope_for(&state, &auth, Action::Consult).await?;
    let user = fetch_visible(&state.pool, scope, id).await?;
    Ok(ApiResponse::ok(user))
}

#[utoipa::path(
    post,
    path = "/api/users",
    tag = "Users",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 403, description = "Group outside the caller's reach"),
        (status = 409, description = "Login already in use"),
        (status = 422, description = "Validation failed")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(payload): ValidJson<UserCreateRequest>,
) -> AppResult<ApiResponse<User>> {
    state.authz.require(&auth, SECURITY_SYSTEM, USERS, Action::Include).await?;
    ensure_assignable(&state, &auth, &payload.groups).await?;

    let login_taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE login = ?")
        .bind(&payload.login)
        .fetch_one(&state.pool)
        .await?;
    if login_taken > 0 {
        return Err(AppError::conflict(format!("login '{}' already in use", payload.login)));
    }

    let password_hash = hash_password(&payload.password)?;
    let now = utc_now();

    let mut tx = state.pool.begin().await?;
    let user_id: i64 = sqlx::query_scalar(
        "INSERT INTO users (login, name, email, password_hash, active, created_at, updated_at) VALUES (?, ?, ?, ?, 1, ?, ?) RETURNING id",
    )
    .bind(&payload.login)
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    replace_groups(&mut tx, user_id, &payload.groups).await?;
    tx.commit().await?;

    let user = load_user(&state.pool, user_id).await?;
    tracing::info!(user_id, login = %user.login, "user created");
    audit(&state.event_bus, "created", Some(auth.user_id), &user, None);

    Ok(ApiResponse::created(user))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = i64, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses((status = 200, description = "User updated", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    ValidJson(payload): ValidJson<UserUpdateRequest>,
) -> AppResult<ApiResponse<User>> {
    let scope = scope_for(&state, &auth, Action::Alter).await?;
    let old = fetch_visible(&state.pool, scope, id).await?;

    let mut user = old.clone();
    if let Some(name) = payload.name {
        user.name = name;
    }
    if let Some(email) = payload.email {
        user.email = Some(email).filter(|e| !e.is_empty());
    }
    if let Some(active) = payload.active {
        if !active && id == auth.user_id {
            return Err(AppError::conflict("you cannot deactivate your own account"));
        }
        user.active = active;
    }
    user.updated_at = utc_now();

    sqlx::query("UPDATE users SET name = ?, email = ?, active = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.active)
        .bind(user.updated_at)
        .bind(id)
        .execute(&state.pool)
        .await?;

    if user.active != old.active {
        state.authz.cache().invalidate_user(id).await;
    }
    audit(&state.event_bus, "updated", Some(auth.user_id), &user, Some(&old));

    Ok(ApiResponse::ok(user))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    tag = "Users",
    params(("id" = i64, Path, description = "User id")),
    responses((status = 200, description = "User soft deleted"), (status = 409, description = "Caller tried to delete themselves")),
    security(("bearerAuth" = []))
)]
pub async fn delete_user(State(state): State<AppState>, auth: AuthUser, Path(id): Path<i64>) -> AppResult<ApiResponse<()>> {
    let scope = scope_for(&state, &auth, Action::Exclude).await?;
    if id == auth.user_id {
        return Err(AppError::conflict("you cannot delete your own account"));
    }
    let user = fetch_visible(&state.pool, scope, id).await?;

    let now = utc_now();
    let affected = sqlx::query("UPDATE users SET deleted_at = ?, active = 0, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("user not found"));
    }

    state.authz.cache().invalidate_user(id).await;
    audit(&state.event_bus, "deleted", Some(auth.user_id), &user, None);

    Ok(ApiResponse::message("user deleted"))
}

#[utoipa::path(
    post,
    path = "/api/users/{id}/password",
    tag = "Users",
    params(("id" = i64, Path, description = "User id")),
    request_body = PasswordResetRequest,
    responses((status = 200, description = "Password replaced")),
    security(("bearerAuth" = []))
)]
pub async fn reset_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    ValidJson(payload): ValidJson<PasswordResetRequest>,
) -> AppResult<ApiResponse<()>> {
    let scope = scope_for(&state, &auth, Action::Alter).await?;
    let user = fetch_visible(&state.pool, scope, id).await?;

    let password_hash = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(utc_now())
        .bind(id)
        .execute(&state.pool)
        .await?;

    audit(&state.event_bus, "password_reset", Some(auth.user_id), &user, None);
    Ok(ApiResponse::message("password reset"))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}/groups",
    tag = "Users",
    params(("id" = i64, Path, description = "User id")),
    request_body = UserGroupsRequest,
    responses(
        (status = 200, description = "Membership replaced", body = User),
        (status = 403, description = "Group outside the caller's reach"),
        (status = 409, description = "Caller tried to change their own membership"),
        (status = 422, description = "Unknown group")
    ),
    security(("bearerAuth" = []))
)]
pub async fn set_user_groups(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    ValidJson(payload): ValidJson<UserGroupsRequest>,
) -> AppResult<ApiResponse<User>> {
    let scope = scope_for(&state, &auth, Action::Alter).await?;
    if id == auth.user_id {
        return Err(AppError::conflict("you cannot change your own group membership"));
    }
    let before = fetch_visible(&state.pool, scope, id).await?;
    let added: Vec<String> = payload
        .groups
        .iter()
        .filter(|group| !before.groups.contains(*group))
        .cloned()
        .collect();
    ensure_assignable(&state, &auth, &added).await?;

    let mut tx = state.pool.begin().await?;
    replace_groups(&mut tx, id, &payload.groups).await?;
    tx.commit().await?;

    state.authz.cache().invalidate_user(id).await;

    let old = UserMembership {
        user_id: id,
        groups: before.groups,
    };
    let new = UserMembership {
        user_id: id,
        groups: payload.groups,
    };
    audit(&state.event_bus, "updated", Some(auth.user_id), &new, Some(&old));

    let user = load_user(&state.pool, id).await?;
    Ok(ApiResponse::ok(user))
}

async fn fetch_visible(pool: &SqlitePool, scope: Scope, id: i64) -> AppResult<User> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ? AND u.deleted_at IS NULL AND {VISIBLE}");
    let row: DbUser = scope
        .bind(sqlx::query_as::<_, DbUser>(&sql).bind(id))
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    let groups = user_groups(pool, row.id).await?;
    Ok(row.into_user(groups))
}

pub(crate) async fn fetch_db_user(pool: &SqlitePool, id: i64) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))
}

pub(crate) async fn fetch_db_user_by_login(pool: &SqlitePool, login: &str) -> AppResult<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.login = ?"))
        .bind(login)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub(crate) async fn load_user(pool: &SqlitePool, id: i64) -> AppResult<User> {
    let row = fetch_db_user(pool, id).await?;
    let groups = user_groups(pool, id).await?;
    Ok(row.into_user(groups))
}

pub(crate) async fn user_groups(pool: &SqlitePool, user_id: i64) -> AppResult<Vec<String>> {
    let groups = sqlx::query_scalar::<_, String>("SELECT group_code FROM user_groups WHERE user_id = ? ORDER BY group_code")
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(groups)
}

pub(crate) async fn groups_by_user(pool: &SqlitePool, ids: &[i64]) -> AppResult<HashMap<i64, Vec<String>>> {
    let mut map: HashMap<i64, Vec<String>> = HashMap::new();
    if ids.is_empty() {
        return Ok(map);
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT user_id, group_code FROM user_groups WHERE user_id IN ({placeholders}) ORDER BY user_id, group_code"
    );
    let mut query = sqlx::query_as::<_, (i64, String)>(&sql);
    for id in ids {
        query = query.bind(id);
    }

    for (user_id, group) in query.fetch_all(pool).await? {
        map.entry(user_id).or_default().push(group);
    }
    Ok(map)
}

async fn ensure_groups_exist(conn: &mut SqliteConnection, groups: &[String]) -> AppResult<()> {
    for (idx, group) in groups.iter().enumerate() {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM groups WHERE code = ?")
            .bind(group)
            .fetch_one(&mut *conn)
            .await?;
        if exists == 0 {
            return Err(AppError::invalid(&format!("groups[{idx}]"), format!("unknown group '{group}'")));
        }
    }
    Ok(())
}

/// Leads with the delete so the surrounding transaction holds the write
/// lock before the group lookups.
async fn replace_groups(conn: &mut SqliteConnection, user_id: i64, groups: &[String]) -> AppResult<()> {
    sqlx::query("DELETE FROM user_groups WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    ensure_groups_exist(&mut *conn, groups).await?;

    let now = utc_now();
    for group in groups {
        sqlx::query("INSERT INTO user_groups (user_id, group_code, created_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(group)
            .bind(now)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
