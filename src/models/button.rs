use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::authz::Action;
use crate::errors::AppError;
use crate::events::Auditable;
use crate::validation::{Validate, ValidationErrors, FUNCTION_CODE_LEN, SYSTEM_CODE_LEN};

/// A UI action bound to a function; shown only to users holding `action`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Button {
    pub id: i64,
    pub system_code: String,
    pub function_code: String,
    #[schema(example = "Novo")]
    pub label: String,
    pub action: Action,
    pub icon: Option<String>,
    pub sort_order: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Button {
    fn entity_type() -> &'static str {
        "button"
    }

    fn subject(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbButton {
    pub id: i64,
    pub system_code: String,
    pub function_code: String,
    pub label: String,
    pub action: String,
    pub icon: Option<String>,
    pub sort_order: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbButton> for Button {
    type Error = AppError;

    fn try_from(value: DbButton) -> Result<Self, Self::Error> {
        let action = value
            .action
            .parse()
            .map_err(|err| AppError::internal(format!("button {}: {err}", value.id)))?;

        Ok(Button {
            id: value.id,
            system_code: value.system_code,
            function_code: value.function_code,
            label: value.label,
            action,
            icon: value.icon,
            sort_order: value.sort_order,
            active: value.active,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ButtonCreateRequest {
    #[schema(example = "SEG")]
    pub system_code: String,
    #[schema(example = "SEG_USUARIOS")]
    pub function_code: String,
    #[schema(example = "Novo")]
    pub label: String,
    pub action: Action,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
}

impl Validate for ButtonCreateRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        errors.code("system_code", &mut self.system_code, SYSTEM_CODE_LEN);
        errors.code("function_code", &mut self.function_code, FUNCTION_CODE_LEN);
        errors.required("label", &mut self.label);
        errors.max_len("label", &self.label, 50);
        if let Some(icon) = &self.icon {
            errors.max_len("icon", icon, 50);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ButtonUpdateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl Validate for ButtonUpdateRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        if let Some(label) = self.label.as_mut() {
            errors.required("label", label);
            errors.max_len("label", label, 50);
        }
        if let Some(icon) = &self.icon {
            errors.max_len("icon", icon, 50);
        }
    }
}
