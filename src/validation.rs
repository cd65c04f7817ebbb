use std::collections::BTreeMap;

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use crate::errors::AppError;

pub const SYSTEM_CODE_LEN: usize = 10;
pub const FUNCTION_CODE_LEN: usize = 30;
pub const GROUP_CODE_LEN: usize = 20;
pub const LOGIN_LEN: usize = 30;

/// Field name -> messages, in stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }

    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }

    pub fn required(&mut self, field: &str, value: &mut String) {
        *value = value.trim().to_string();
        if value.is_empty() {
            self.add(field, "is required");
        }
    }

    pub fn max_len(&mut self, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.add(field, format!("must be at most {max} characters"));
        }
    }

    /// Normalises a legacy fixed-width code in place and records any problem.
    pub fn code(&mut self, field: &str, value: &mut String, max: usize) {
        match normalize_code(value, max) {
            Ok(code) => *value = code,
            Err(message) => self.add(field, message),
        }
    }
}

/// Legacy codes are stored right-padded and compared case-insensitively;
/// the canonical form is trimmed and upper-cased.
pub fn normalize_code(raw: &str, max: usize) -> Result<String, String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() {
        return Err("is required".to_string());
    }
    if code.len() > max {
        return Err(format!("must be at most {max} characters"));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("may only contain letters, digits and '_'".to_string());
    }
    Ok(code)
}

/// Path/query variant of [`normalize_code`] that fails the whole request.
pub fn code_param(field: &str, raw: &str, max: usize) -> Result<String, AppError> {
    normalize_code(raw, max).map_err(|message| AppError::invalid(field, message))
}

pub trait Validate {
    /// Normalise fields in place and record every problem found.
    fn validate(&mut self, errors: &mut ValidationErrors);
}

/// JSON body extractor reporting the offending field path on bad input and
/// running [`Validate`] before the handler sees the value.
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;

        let deserializer = &mut serde_json::Deserializer::from_slice(&bytes);
        let mut value: T = serde_path_to_error::deserialize(deserializer).map_err(|err| {
            let path = err.path().to_string();
            let field = if path == "." { "body" } else { path.as_str() };
            AppError::invalid(field, err.inner().to_string())
        })?;

        let mut errors = ValidationErrors::new();
        value.validate(&mut errors);
        errors.into_result()?;

        Ok(Self(value))
    }
}
