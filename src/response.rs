//! Uniform JSON envelope returned by every endpoint.

use std::collections::BTreeMap;

use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub const TRACE_HEADER: &str = "x-trace-id";
const MAX_TRACE_ID_LEN: usize = 128;

tokio::task_local! {
    static TRACE_ID: String;
}

/// Trace id of the request being served, or a fresh one outside a request.
pub fn current_trace_id() -> String {
    TRACE_ID
        .try_with(|id| id.clone())
        .unwrap_or_else(|_| Uuid::new_v4().simple().to_string())
}

/// Accepts an incoming `x-trace-id` or assigns one, then echoes it back.
pub async fn trace_id_middleware(req: Request, next: Next) -> Response {
    let trace_id = req
        .headers()
        .get(TRACE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_TRACE_ID_LEN)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let mut response = TRACE_ID.scope(trace_id.clone(), next.run(req)).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }

    response
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ErrorDetail {
    #[schema(example = "forbidden")]
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, Vec<String>>,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
}

impl<T> BaseResponse<T> {
    pub fn success(data: T, message: Option<String>) -> Self {
        Self {
            success: true,
            message,
            data: Some(data),
            error: None,
            errors: BTreeMap::new(),
            trace_id: current_trace_id(),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(message: String, error: ErrorDetail, errors: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            success: false,
            message: Some(message),
            data: None,
            error: Some(error),
            errors,
            trace_id: current_trace_id(),
            timestamp: Utc::now(),
        }
    }
}

/// Success response builder; handlers return this instead of bare `Json`.
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    data: T,
    status: StatusCode,
    message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data,
            status: StatusCode::OK,
            message: None,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            data,
            status: StatusCode::CREATED,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self::ok(()).with_message(message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let envelope = BaseResponse::success(self.data, self.message);
        (self.status, Json(envelope)).into_response()
    }
}
