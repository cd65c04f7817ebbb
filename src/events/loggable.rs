use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Severity levels for audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Access-control changes and deletions
    Critical,
    /// Regular administrative changes
    #[default]
    Important,
    /// Routine events such as logins
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Entities whose changes end up in the audit log.
pub trait Auditable: Serialize + Send + Sync {
    /// Prefix of event names, e.g. "system" in "system.created".
    fn entity_type() -> &'static str;

    /// Natural key of the entity (code or id) as text.
    fn subject(&self) -> String;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" => Severity::Critical,
            "created" | "updated" => self.severity(),
            "login" => Severity::Noise,
            _ => Severity::Important,
        }
    }
}
