use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::authz::UserPermissions;
use crate::events::{Auditable, Severity};
use crate::utils::MIN_PASSWORD_LENGTH;
use crate::validation::{Validate, ValidationErrors, GROUP_CODE_LEN, LOGIN_LEN};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct User {
    pub id: i64,
    #[schema(example = "msouza")]
    pub login: String,
    #[schema(example = "Maria Souza")]
    pub name: String,
    pub email: Option<String>,
    pub active: bool,
    pub groups: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl Auditable for User {
    fn entity_type() -> &'static str {
        "user"
    }

    fn subject(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: i64,
    pub login: String,
    pub name: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl DbUser {
    pub fn into_user(self, groups: Vec<String>) -> User {
        User {
            id: self.id,
            login: self.login,
            name: self.name,
            email: self.email,
            active: self.active,
            groups,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_login_at: self.last_login_at,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}

/// Trims the address and checks its shape; a blank address is left as `""`.
fn validate_email(errors: &mut ValidationErrors, email: &mut Option<String>) {
    if let Some(value) = email.as_mut() {
        *value = value.trim().to_string();
        if !value.is_empty() && (!value.contains('@') || value.starts_with('@') || value.ends_with('@')) {
            errors.add("email", "is not a valid e-mail address");
        }
    }
}

fn validate_groups(errors: &mut ValidationErrors, groups: &mut Vec<String>) {
    for (idx, group) in groups.iter_mut().enumerate() {
        errors.code(&format!("groups[{idx}]"), group, GROUP_CODE_LEN);
    }
    groups.sort();
    groups.dedup();
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserCreateRequest {
    #[schema(example = "msouza")]
    pub login: String,
    #[schema(example = "Maria Souza")]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Validate for UserCreateRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        errors.required("login", &mut self.login);
        self.login = self.login.to_lowercase();
        errors.max_len("login", &self.login, LOGIN_LEN);
        if self.login.chars().any(char::is_whitespace) {
            errors.add("login", "must not contain spaces");
        }
        errors.required("name", &mut self.name);
        errors.max_len("name", &self.name, 100);
        validate_email(errors, &mut self.email);
        if self.email.as_deref() == Some("") {
            self.email = None;
        }
        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.add("password", format!("must be at least {MIN_PASSWORD_LENGTH} characters"));
        }
        validate_groups(errors, &mut self.groups);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UserUpdateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Absent keeps the address, `""` clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl Validate for UserUpdateRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        if let Some(name) = self.name.as_mut() {
            errors.required("name", name);
            errors.max_len("name", name, 100);
        }
        validate_email(errors, &mut self.email);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserGroupsRequest {
    pub groups: Vec<String>,
}

impl Validate for UserGroupsRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        validate_groups(errors, &mut self.groups);
    }
}

/// Group membership change, audited separately from the user record.
#[derive(Debug, Clone, Serialize)]
pub struct UserMembership {
    pub user_id: i64,
    pub groups: Vec<String>,
}

impl Auditable for UserMembership {
    fn entity_type() -> &'static str {
        "user_groups"
    }

    fn subject(&self) -> String {
        self.user_id.to_string()
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    pub new_password: String,
}

impl Validate for PasswordResetRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        if self.new_password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.add("new_password", format!("must be at least {MIN_PASSWORD_LENGTH} characters"));
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
}

impl Validate for PasswordChangeRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        if self.current_password.is_empty() {
            errors.add("current_password", "is required");
        }
        if self.new_password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.add("new_password", format!("must be at least {MIN_PASSWORD_LENGTH} characters"));
        }
        if self.new_password == self.current_password {
            errors.add("new_password", "must differ from the current password");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "admin")]
    pub login: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&mut self, errors: &mut ValidationErrors) {
        errors.required("login", &mut self.login);
        self.login = self.login.to_lowercase();
        if self.password.is_empty() {
            errors.add("password", "is required");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
    pub permissions: UserPermissions,
}
