use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::IntoParams;

use crate::app::AppState;
use crate::authz::codes::{BUTTONS, SECURITY_SYSTEM};
use crate::authz::{Action, AuthzMode};
use crate::datatables::{DataTableQuery, DataTableResponse};
use crate::errors::{AppError, AppResult};
use crate::events::audit;
use crate::jwt::AuthUser;
use crate::models::button::{Button, ButtonCreateRequest, ButtonUpdateRequest, DbButton};
use crate::response::ApiResponse;
use crate::utils::utc_now;
use crate::validation::{code_param, ValidJson, FUNCTION_CODE_LEN, SYSTEM_CODE_LEN};

const BUTTON_COLUMNS: &str =
    "id, system_code, function_code, label, action, icon, sort_order, active, created_at, updated_at";
const ORDERABLE: &[&str] = &["sort_order", "label", "system_code", "function_code", "action", "active"];

/// Optional narrowing of the button grid; read next to the DataTables parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ButtonFilter {
    pub system: Option<String>,
    pub function: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VisibleQuery {
    pub system: String,
    pub function: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_buttons).post(create_button))
        .route("/visible", get(visible_buttons))
        .route("/:id", get(get_button).put(update_button).delete(delete_button))
}

#[utoipa::path(
    get,
    path = "/api/buttons",
    tag = "Buttons",
    params(DataTableQuery, ButtonFilter),
    responses((status = 200, description = "DataTables page of buttons")),
    security(("bearerAuth" = []))
)]
pub async fn list_buttons(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<DataTableQuery>,
    Query(filter): Query<ButtonFilter>,
) -> AppResult<ApiResponse<DataTableResponse<Button>>> {
    state.authz.require(&auth, SECURITY_SYSTEM, BUTTONS, Action::Consult).await?;
    let page = query.page();

    let system = filter
        .system
        .as_deref()
        .map(|raw| code_param("system", raw, SYSTEM_CODE_LEN))
        .transpose()?;
    let function = filter
        .function
        .as_deref()
        .map(|raw| code_param("function", raw, FUNCTION_CODE_LEN))
        .transpose()?;

    let scope = "(? IS NULL OR system_code = ?) AND (? IS NULL OR function_code = ?)";
    let search = "(? IS NULL OR label LIKE ? ESCAPE '\\' OR function_code LIKE ? ESCAPE '\\')";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM buttons WHERE {scope}"))
        .bind(&system)
        .bind(&system)
        .bind(&function)
        .bind(&function)
        .fetch_one(&state.pool)
        .await?;

    let filtered: i64 = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM buttons WHERE {scope} AND {search}"))
        .bind(&system)
        .bind(&system)
        .bind(&function)
        .bind(&function)
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .fetch_one(&state.pool)
        .await?;

    let sql = format!(
        "SELECT {BUTTON_COLUMNS} FROM buttons WHERE {scope} AND {search} {}, id LIMIT ? OFFSET ?",
        page.order_by(ORDERABLE)
    );
    let rows = sqlx::query_as::<_, DbButton>(&sql)
        .bind(&system)
        .bind(&system)
        .bind(&function)
        .bind(&function)
        .bind(&page.search)
        .bind(&page.search)
        .bind(&page.search)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&state.pool)
        .await?;

    let buttons = rows.into_iter().map(Button::try_from).collect::<Result<Vec<_>, _>>()?;

    Ok(ApiResponse::ok(DataTableResponse::new(&page, total, filtered, buttons)))
}

#[utoipa::path(
    get,
    path = "/api/buttons/visible",
    tag = "Buttons",
    params(VisibleQuery),
    responses(
        (status = 200, description = "Active buttons of the function whose action the caller holds", body = [Button]),
        (status = 403, description = "No access to the function")
    ),
    security(("bearerAuth" = []))
)]
pub async fn visible_buttons(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<VisibleQuery>,
) -> AppResult<ApiResponse<Vec<Button>>> {
    let system = code_param("system", &query.system, SYSTEM_CODE_LEN)?;
    let function = code_param("function", &query.function, FUNCTION_CODE_LEN)?;

    let permissions = state.authz.require_any(&auth, &system, &function).await?;
    let unchecked = state.authz.mode() == AuthzMode::Off;

    let rows = sqlx::query_as::<_, DbButton>(&format!(
        "SELECT {BUTTON_COLUMNS} FROM buttons WHERE system_code = ? AND function_code = ? AND active = 1 ORDER BY sort_order, id"
    ))
    .bind(&system)
    .bind(&function)
    .fetch_all(&state.pool)
    .await?;

    let mut buttons = Vec::with_capacity(rows.len());
    for row in rows {
        let button = Button::try_from(row)?;
        if unchecked || permissions.can(&system, &function, button.action) {
            buttons.push(button);
        }
    }

    Ok(ApiResponse::ok(buttons))
}

#[utoipa::path(
    get,
    path = "/api/buttons/{id}",
    tag = "Buttons",
    params(("id" = i64, Path, description = "Button id")),
    responses((status = 200, description = "Button detail", body = Button), (status = 404, description = "Unknown button")),
    security(("bearerAuth" = []))
)]
pub async fn get_button(State(state): State<AppState>, auth: AuthUser, Path(id): Path<i64>) -> AppResult<ApiResponse<Button>> {
    state.authz.require(&auth, SECURITY_SYSTEM, BUTTONS, Action::Consult).await?;
    let button = fetch_button(&state.pool, id).await?;
    Ok(ApiResponse::ok(button))
}

#[utoipa::path(
    post,
    path = "/api/buttons",
    tag = "Buttons",
    request_body = ButtonCreateRequest,
    responses(
        (status = 201, description = "Button created", body = Button),
        (status = 422, description = "Validation failed or unknown function")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_button(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(payload): ValidJson<ButtonCreateRequest>,
) -> AppResult<ApiResponse<Button>> {
    state.authz.require(&auth, SECURITY_SYSTEM, BUTTONS, Action::Include).await?;

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM functions WHERE system_code = ? AND code = ?")
        .bind(&payload.system_code)
        .bind(&payload.function_code)
        .fetch_one(&state.pool)
        .await?;
    if exists == 0 {
        return Err(AppError::invalid(
            "function_code",
            format!("unknown function '{}/{}'", payload.system_code, payload.function_code),
        ));
    }

    let now = utc_now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO buttons (system_code, function_code, label, action, icon, sort_order, active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?) RETURNING id",
    )
    .bind(&payload.system_code)
    .bind(&payload.function_code)
    .bind(&payload.label)
    .bind(payload.action.to_string())
    .bind(&payload.icon)
    .bind(payload.sort_order)
    .bind(now)
    .bind(now)
    .fetch_one(&state.pool)
    .await?;

    let button = fetch_button(&state.pool, id).await?;
    audit(&state.event_bus, "created", Some(auth.user_id), &button, None);

    Ok(ApiResponse::created(button))
}

#[utoipa::path(
    put,
    path = "/api/buttons/{id}",
    tag = "Buttons",
    params(("id" = i64, Path, description = "Button id")),
    request_body = ButtonUpdateRequest,
    responses((status = 200, description = "Button updated", body = Button)),
    security(("bearerAuth" = []))
)]
pub async fn update_button(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    ValidJson(payload): ValidJson<ButtonUpdateRequest>,
) -> AppResult<ApiResponse<Button>> {
    state.authz.require(&auth, SECURITY_SYSTEM, BUTTONS, Action::Alter).await?;
    let old = fetch_button(&state.pool, id).await?;

    let mut button = old.clone();
    if let Some(label) = payload.label {
        button.label = label;
    }
    if let Some(action) = payload.action {
        button.action = action;
    }
    if payload.icon.is_some() {
        button.icon = payload.icon;
    }
    if let Some(sort_order) = payload.sort_order {
        button.sort_order = sort_order;
    }
    if let Some(active) = payload.active {
        button.active = active;
    }
    button.updated_at = utc_now();

    sqlx::query("UPDATE buttons SET label = ?, action = ?, icon = ?, sort_order = ?, active = ?, updated_at = ? WHERE id = ?")
        .bind(&button.label)
        .bind(button.action.to_string())
        .bind(&button.icon)
        .bind(button.sort_order)
        .bind(button.active)
        .bind(button.updated_at)
        .bind(id)
        .execute(&state.pool)
        .await?;

    audit(&state.event_bus, "updated", Some(auth.user_id), &button, Some(&old));
    Ok(ApiResponse::ok(button))
}

#[utoipa::path(
    delete,
    path = "/api/buttons/{id}",
    tag = "Buttons",
    params(("id" = i64, Path, description = "Button id")),
    responses((status = 200, description = "Button deleted")),
    security(("bearerAuth" = []))
)]
pub async fn delete_button(State(state): State<AppState>, auth: AuthUser, Path(id): Path<i64>) -> AppResult<ApiResponse<()>> {
    state.authz.require(&auth, SECURITY_SYSTEM, BUTTONS, Action::Exclude).await?;
    let button = fetch_button(&state.pool, id).await?;

    sqlx::query("DELETE FROM buttons WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    audit(&state.event_bus, "deleted", Some(auth.user_id), &button, None);
    Ok(ApiResponse::message("button deleted"))
}

async fn fetch_button(pool: &SqlitePool, id: i64) -> AppResult<Button> {
    sqlx::query_as::<_, DbButton>(&format!("SELECT {BUTTON_COLUMNS} FROM buttons WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("button not found"))?
        .try_into()
}
