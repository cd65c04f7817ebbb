use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::authz::{ActionSet, Restriction};
use crate::errors::AppError;
use crate::events::{Auditable, Severity};
use crate::validation::{Validate, ValidationErrors, FUNCTION_CODE_LEN, GROUP_CODE_LEN, SYSTEM_CODE_LEN};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema, PartialEq)]
pub struct Group {
    #[schema(example = "RH")]
    pub code: String,
    #[schema(example = "Recursos humanos")]
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Group {
    fn entity_type() -> &'static str {
        "group"
    }

    fn subject(&self) -> String {
        self.code.clone()
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupCreateRequest {
    #[schema(example = "RH")]
    pub code: String,
    #[schema(example = "Recursos humanos")]
    pub name: String,
}

impl Validate for GroupCreateRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        errors.code("code", &mut self.code, GROUP_CODE_LEN);
        errors.required("name", &mut self.name);
        errors.max_len("name", &self.name, 100);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct GroupUpdateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl Validate for GroupUpdateRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        if let Some(name) = self.name.as_mut() {
            errors.required("name", name);
            errors.max_len("name", name, 100);
        }
    }
}

/// Grant row of a group on one function.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct GroupPermission {
    pub group_code: String,
    pub system_code: String,
    pub function_code: String,
    #[schema(value_type = String, example = "CI")]
    pub actions: ActionSet,
    pub restriction: Restriction,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for GroupPermission {
    fn entity_type() -> &'static str {
        "group_permission"
    }

    fn subject(&self) -> String {
        format!("{}/{}/{}", self.group_code, self.system_code, self.function_code)
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbGroupPermission {
    pub group_code: String,
    pub system_code: String,
    pub function_code: String,
    pub actions: String,
    pub restriction: String,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbGroupPermission> for GroupPermission {
    type Error = AppError;

    fn try_from(value: DbGroupPermission) -> Result<Self, Self::Error> {
        let actions = value.actions.parse().map_err(AppError::internal)?;
        let restriction = value.restriction.parse().map_err(AppError::internal)?;

        Ok(GroupPermission {
            group_code: value.group_code,
            system_code: value.system_code,
            function_code: value.function_code,
            actions,
            restriction,
            updated_at: value.updated_at,
        })
    }
}

/// Body of `PUT /api/groups/{code}/permissions/{system}/{function}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupPermissionRequest {
    /// ACEI letters, any order.
    #[schema(example = "ACEI")]
    pub actions: String,
    pub restriction: Restriction,
}

impl GroupPermissionRequest {
    /// Canonical set; only meaningful after validation.
    pub fn action_set(&self) -> ActionSet {
        self.actions.parse().unwrap_or_default()
    }
}

impl Validate for GroupPermissionRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        match self.actions.parse::<ActionSet>() {
            Ok(set) if set.is_empty() => errors.add("actions", "at least one action is required"),
            Ok(set) => self.actions = set.to_string(),
            Err(message) => errors.add("actions", message),
        }
    }
}

/// Path triple of a grant row, validated as codes.
#[derive(Debug, Clone)]
pub struct GrantKey {
    pub group_code: String,
    pub system_code: String,
    pub function_code: String,
}

impl GrantKey {
    pub fn parse(group: &str, system: &str, function: &str) -> Result<Self, AppError> {
        use crate::validation::code_param;

        Ok(Self {
            group_code: code_param("group", group, GROUP_CODE_LEN)?,
            system_code: code_param("system", system, SYSTEM_CODE_LEN)?,
            function_code: code_param("function", function, FUNCTION_CODE_LEN)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_request_canonicalises_actions() {
        let mut req = GroupPermissionRequest {
            actions: "ic".to_string(),
            restriction: Restriction::Partial,
        };
        let mut errors = ValidationErrors::new();
        req.validate(&mut errors);

        assert!(errors.is_empty());
        assert_eq!(req.actions, "CI");
        assert_eq!(req.action_set().to_string(), "CI");
    }

    #[test]
    fn permission_request_rejects_empty_and_unknown() {
        for raw in ["", "XZ"] {
            let mut req = GroupPermissionRequest {
                actions: raw.to_string(),
                restriction: Restriction::Liberal,
            };
            let mut errors = ValidationErrors::new();
            req.validate(&mut errors);
            assert!(errors.get("actions").is_some(), "{raw:?} accepted");
        }
    }
}
