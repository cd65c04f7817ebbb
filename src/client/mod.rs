//! Typed consumer of the HTTP API.
//!
//! [`ApiClient`] unwraps the response envelope and keeps the bearer token of
//! the last login. [`PermissionSession`] caches the caller's aggregated
//! permissions and [`PermissionGate`] decides what a UI may show.

mod gate;
mod session;

pub use gate::{PermissionGate, Requirement};
pub use session::PermissionSession;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::authz::{Action, PermissionDecision, UserPermissions};
use crate::datatables::{DataTableQuery, DataTableResponse};
use crate::models::audit::AuditEntry;
use crate::models::button::{Button, ButtonCreateRequest, ButtonUpdateRequest};
use crate::models::group::{Group, GroupCreateRequest, GroupPermission, GroupPermissionRequest, GroupUpdateRequest};
use crate::models::system::{FunctionCreateRequest, System, SystemCreateRequest, SystemFunction, SystemUpdateRequest};
use crate::models::user::{
    AuthResponse, LoginRequest, PasswordChangeRequest, PasswordResetRequest, User, UserCreateRequest,
    UserGroupsRequest, UserUpdateRequest,
};
use crate::response::{BaseResponse, TRACE_HEADER};
use crate::routes::audit::ChainVerification;
use crate::routes::auth::PermissionsResponse;
use crate::routes::buttons::ButtonFilter;
use crate::routes::health::HealthResponse;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    /// The API answered with a failure envelope (or a non-envelope error body).
    #[error("{status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        errors: BTreeMap<String, Vec<String>>,
        trace_id: Option<String>,
    },

    #[error("not logged in")]
    NotAuthenticated,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    /// Messages reported for one request field, empty when none.
    pub fn field_errors(&self, field: &str) -> &[String] {
        match self {
            ClientError::Api { errors, .. } => errors.get(field).map(Vec::as_slice).unwrap_or(&[]),
            _ => &[],
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient").field("base_url", &self.base_url).finish()
    }
}

impl ApiClient {
    /// `base_url` is the server root, e.g. `http://localhost:8000`.
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_http(http, base_url))
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    // ===================================
    // Auth
    // ===================================

    pub async fn health(&self) -> ClientResult<HealthResponse> {
        self.send(self.request(Method::GET, "/api/health").await).await
    }

    /// Logs in and keeps the issued token for later calls.
    pub async fn login(&self, login: &str, password: &str) -> ClientResult<AuthResponse> {
        let body = LoginRequest {
            login: login.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self
            .send(self.request(Method::POST, "/api/auth/login").await.json(&body))
            .await?;
        self.set_token(Some(auth.token.clone())).await;
        tracing::debug!(user_id = auth.user.id, "client logged in");
        Ok(auth)
    }

    pub async fn refresh(&self) -> ClientResult<AuthResponse> {
        let auth: AuthResponse = self.send(self.authed(Method::POST, "/api/auth/refresh").await?).await?;
        self.set_token(Some(auth.token.clone())).await;
        Ok(auth)
    }

    /// Tells the server and drops the local token even when the call fails.
    pub async fn logout(&self) -> ClientResult<()> {
        let result = match self.authed(Method::POST, "/api/auth/logout").await {
            Ok(builder) => self.send_unit(builder).await,
            Err(ClientError::NotAuthenticated) => Ok(()),
            Err(err) => Err(err),
        };
        self.set_token(None).await;
        result
    }

    pub async fn me(&self) -> ClientResult<User> {
        self.send(self.authed(Method::GET, "/api/auth/me").await?).await
    }

    pub async fn permissions(&self) -> ClientResult<UserPermissions> {
        let response: PermissionsResponse = self.send(self.authed(Method::GET, "/api/auth/permissions").await?).await?;
        Ok(response.permissions)
    }

    pub async fn check(&self, system: &str, function: &str, action: Action) -> ClientResult<PermissionDecision> {
        let query = [("system", system.to_string()), ("function", function.to_string()), ("action", action.to_string())];
        self.send(self.authed(Method::GET, "/api/auth/check").await?.query(&query))
            .await
    }

    pub async fn change_password(&self, current_password: &str, new_password: &str) -> ClientResult<()> {
        let body = PasswordChangeRequest {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        };
        self.send_unit(self.authed(Method::PUT, "/api/auth/password").await?.json(&body))
            .await
    }

    // ===================================
    // Systems
    // ===================================

    pub async fn list_systems(&self, query: &DataTableQuery) -> ClientResult<DataTableResponse<System>> {
        self.send(self.authed(Method::GET, "/api/systems").await?.query(query)).await
    }

    pub async fn get_system(&self, code: &str) -> ClientResult<System> {
        self.send(self.authed(Method::GET, &format!("/api/systems/{code}")).await?)
            .await
    }

    pub async fn create_system(&self, body: &SystemCreateRequest) -> ClientResult<System> {
        self.send_json(Method::POST, "/api/systems", body).await
    }

    pub async fn update_system(&self, code: &str, body: &SystemUpdateRequest) -> ClientResult<System> {
        self.send_json(Method::PUT, &format!("/api/systems/{code}"), body).await
    }

    pub async fn delete_system(&self, code: &str) -> ClientResult<()> {
        self.send_unit(self.authed(Method::DELETE, &format!("/api/systems/{code}")).await?)
            .await
    }

    pub async fn list_functions(&self, system: &str) -> ClientResult<Vec<SystemFunction>> {
        self.send(self.authed(Method::GET, &format!("/api/systems/{system}/functions")).await?)
            .await
    }

    pub async fn create_function(&self, system: &str, body: &FunctionCreateRequest) -> ClientResult<SystemFunction> {
        self.send_json(Method::POST, &format!("/api/systems/{system}/functions"), body)
            .await
    }

    pub async fn delete_function(&self, system: &str, function: &str) -> ClientResult<()> {
        let path = format!("/api/systems/{system}/functions/{function}");
        self.send_unit(self.authed(Method::DELETE, &path).await?).await
    }

    // ===================================
    // Users
    // ===================================

    pub async fn list_users(&self, query: &DataTableQuery) -> ClientResult<DataTableResponse<User>> {
        self.send(self.authed(Method::GET, "/api/users").await?.query(query)).await
    }

    pub async fn get_user(&self, id: i64) -> ClientResult<User> {
        self.send(self.authed(Method::GET, &format!("/api/users/{id}")).await?)
            .await
    }

    pub async fn create_user(&self, body: &UserCreateRequest) -> ClientResult<User> {
        self.send_json(Method::POST, "/api/users", body).await
    }

    pub async fn update_user(&self, id: i64, body: &UserUpdateRequest) -> ClientResult<User> {
        self.send_json(Method::PUT, &format!("/api/users/{id}"), body).await
    }

    pub async fn delete_user(&self, id: i64) -> ClientResult<()> {
        self.send_unit(self.authed(Method::DELETE, &format!("/api/users/{id}")).await?)
            .await
    }

    pub async fn reset_password(&self, id: i64, new_password: &str) -> ClientResult<()> {
        let body = PasswordResetRequest {
            new_password: new_password.to_string(),
        };
        self.send_unit(
            self.authed(Method::POST, &format!("/api/users/{id}/password"))
                .await?
                .json(&body),
        )
        .await
    }

    pub async fn set_user_groups(&self, id: i64, groups: Vec<String>) -> ClientResult<User> {
        self.send_json(Method::PUT, &format!("/api/users/{id}/groups"), &UserGroupsRequest { groups })
            .await
    }

    // ===================================
    // Buttons
    // ===================================

    pub async fn list_buttons(&self, query: &DataTableQuery, filter: &ButtonFilter) -> ClientResult<DataTableResponse<Button>> {
        self.send(
            self.authed(Method::GET, "/api/buttons")
                .await?
                .query(query)
                .query(filter),
        )
        .await
    }

    /// Buttons of a screen the caller may use, as decided by the server.
    pub async fn visible_buttons(&self, system: &str, function: &str) -> ClientResult<Vec<Button>> {
        let query = [("system", system), ("function", function)];
        self.send(self.authed(Method::GET, "/api/buttons/visible").await?.query(&query))
            .await
    }

    pub async fn get_button(&self, id: i64) -> ClientResult<Button> {
        self.send(self.authed(Method::GET, &format!("/api/buttons/{id}")).await?)
            .await
    }

    pub async fn create_button(&self, body: &ButtonCreateRequest) -> ClientResult<Button> {
        self.send_json(Method::POST, "/api/buttons", body).await
    }

    pub async fn update_button(&self, id: i64, body: &ButtonUpdateRequest) -> ClientResult<Button> {
        self.send_json(Method::PUT, &format!("/api/buttons/{id}"), body).await
    }

    pub async fn delete_button(&self, id: i64) -> ClientResult<()> {
        self.send_unit(self.authed(Method::DELETE, &format!("/api/buttons/{id}")).await?)
            .await
    }

    // ===================================
    // Groups
    // ===================================

    pub async fn list_groups(&self, query: &DataTableQuery) -> ClientResult<DataTableResponse<Group>> {
        self.send(self.authed(Method::GET, "/api/groups").await?.query(query)).await
    }

    pub async fn get_group(&self, code: &str) -> ClientResult<Group> {
        self.send(self.authed(Method::GET, &format!("/api/groups/{code}")).await?)
            .await
    }

    pub async fn create_group(&self, body: &GroupCreateRequest) -> ClientResult<Group> {
        self.send_json(Method::POST, "/api/groups", body).await
    }

    pub async fn update_group(&self, code: &str, body: &GroupUpdateRequest) -> ClientResult<Group> {
        self.send_json(Method::PUT, &format!("/api/groups/{code}"), body).await
    }

    pub async fn delete_group(&self, code: &str) -> ClientResult<()> {
        self.send_unit(self.authed(Method::DELETE, &format!("/api/groups/{code}")).await?)
            .await
    }

    pub async fn group_permissions(&self, code: &str) -> ClientResult<Vec<GroupPermission>> {
        self.send(self.authed(Method::GET, &format!("/api/groups/{code}/permissions")).await?)
            .await
    }

    pub async fn set_group_permission(
        &self,
        group: &str,
        system: &str,
        function: &str,
        body: &GroupPermissionRequest,
    ) -> ClientResult<GroupPermission> {
        self.send_json(Method::PUT, &format!("/api/groups/{group}/permissions/{system}/{function}"), body)
            .await
    }

    pub async fn delete_group_permission(&self, group: &str, system: &str, function: &str) -> ClientResult<()> {
        let path = format!("/api/groups/{group}/permissions/{system}/{function}");
        self.send_unit(self.authed(Method::DELETE, &path).await?).await
    }

    pub async fn group_users(&self, code: &str) -> ClientResult<Vec<User>> {
        self.send(self.authed(Method::GET, &format!("/api/groups/{code}/users")).await?)
            .await
    }

    // ===================================
    // Audit
    // ===================================

    pub async fn list_audit(&self, query: &DataTableQuery) -> ClientResult<DataTableResponse<AuditEntry>> {
        self.send(self.authed(Method::GET, "/api/audit").await?.query(query)).await
    }

    pub async fn verify_audit(&self) -> ClientResult<ChainVerification> {
        self.send(self.authed(Method::GET, "/api/audit/verify").await?).await
    }

    // ===================================
    // Plumbing
    // ===================================

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match self.token.read().await.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn authed(&self, method: Method, path: &str) -> ClientResult<RequestBuilder> {
        if !self.is_authenticated().await {
            return Err(ClientError::NotAuthenticated);
        }
        Ok(self.request(method, path).await)
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(self.authed(method, path).await?.json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClientResult<T> {
        let envelope: BaseResponse<T> = execute(builder).await?;
        envelope
            .data
            .ok_or_else(|| ClientError::Decode("success envelope without data".to_string()))
    }

    async fn send_unit(&self, builder: RequestBuilder) -> ClientResult<()> {
        execute::<serde_json::Value>(builder).await.map(|_| ())
    }
}

async fn execute<T: DeserializeOwned>(builder: RequestBuilder) -> ClientResult<BaseResponse<T>> {
    let response = builder.send().await?;
    let status = response.status().as_u16();
    let header_trace = response
        .headers()
        .get(TRACE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(String::from);
    let body = response.bytes().await?;

    if (200..300).contains(&status) {
        return serde_json::from_slice(&body).map_err(|err| ClientError::Decode(err.to_string()));
    }

    Err(api_error(status, header_trace, &body))
}

/// Failure envelopes carry code, message and field errors; anything else
/// (proxy pages, framework rejections) keeps the raw text as message.
fn api_error(status: u16, header_trace: Option<String>, body: &[u8]) -> ClientError {
    match serde_json::from_slice::<BaseResponse<serde_json::Value>>(body) {
        Ok(envelope) => {
            let (code, detail) = envelope
                .error
                .map(|error| (error.code, Some(error.message)))
                .unwrap_or_else(|| (fallback_code(status).to_string(), None));
            ClientError::Api {
                status,
                code,
                message: envelope.message.or(detail).unwrap_or_default(),
                errors: envelope.errors,
                trace_id: Some(envelope.trace_id),
            }
        }
        Err(_) => ClientError::Api {
            status,
            code: fallback_code(status).to_string(),
            message: String::from_utf8_lossy(body).trim().to_string(),
            errors: BTreeMap::new(),
            trace_id: header_trace,
        },
    }
}

fn fallback_code(status: u16) -> &'static str {
    match status {
        400 => "bad_request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not_found",
        409 => "conflict",
        422 => "validation",
        500..=599 => "internal",
        _ => "http_error",
    }
}
