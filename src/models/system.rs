use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::events::Auditable;
use crate::validation::{Validate, ValidationErrors, FUNCTION_CODE_LEN, SYSTEM_CODE_LEN};

/// A module of the platform (legacy `CdSistema`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema, PartialEq)]
pub struct System {
    #[schema(example = "FOLHA")]
    pub code: String,
    #[schema(example = "Folha de pagamento")]
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for System {
    fn entity_type() -> &'static str {
        "system"
    }

    fn subject(&self) -> String {
        self.code.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SystemCreateRequest {
    #[schema(example = "FOLHA")]
    pub code: String,
    #[schema(example = "Folha de pagamento")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Validate for SystemCreateRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        errors.code("code", &mut self.code, SYSTEM_CODE_LEN);
        errors.required("name", &mut self.name);
        errors.max_len("name", &self.name, 100);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SystemUpdateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl Validate for SystemUpdateRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        if let Some(name) = self.name.as_mut() {
            errors.required("name", name);
            errors.max_len("name", name, 100);
        }
    }
}

/// A screen or feature inside a system (legacy `CdFuncao`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema, PartialEq)]
pub struct SystemFunction {
    pub system_code: String,
    #[schema(example = "FOL_CALCULO")]
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Auditable for SystemFunction {
    fn entity_type() -> &'static str {
        "function"
    }

    fn subject(&self) -> String {
        format!("{}/{}", self.system_code, self.code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionCreateRequest {
    #[schema(example = "FOL_CALCULO")]
    pub code: String,
    #[schema(example = "Calculo da folha")]
    pub name: String,
}

impl Validate for FunctionCreateRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        errors.code("code", &mut self.code, FUNCTION_CODE_LEN);
        errors.required("name", &mut self.name);
        errors.max_len("name", &self.name, 100);
    }
}
