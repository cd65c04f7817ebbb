//! Authorization module - ACEI permission model
//!
//! Users belong to groups; each group holds grant rows of the form
//! (system, function, action letters, restriction level). A user's effective
//! access to a function is the union of the action letters of all their
//! groups, with the most restrictive restriction level (C > P > L).
//!
//! - Action letters and sets (`A`lter, `C`onsult, `E`xclude, `I`nclude)
//! - Restriction levels (`L`iberal, `P`artial, `C`losed)
//! - Aggregation and claim encoding
//! - Cached lookup through a pluggable grant source
//! - Configurable enforcement modes (off/advisory/strict)

mod action;
mod cache;
mod evaluator;
mod principal;
mod restriction;
mod source;

pub use action::{Action, ActionSet};
pub use cache::PermissionCache;
pub use evaluator::{Authorizer, PermissionDecision};
pub use principal::{FunctionAccess, PermissionGrant, UserPermissions};
pub use restriction::Restriction;
pub use source::{PermissionSource, SqlitePermissionSource};

use std::str::FromStr;

/// Authorization enforcement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthzMode {
    /// No permission checks (development mode)
    Off,
    /// Log denials but allow requests (testing mode)
    Advisory,
    /// Enforce 403 on denied requests (production mode)
    #[default]
    Strict,
}

impl FromStr for AuthzMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(AuthzMode::Off),
            "advisory" => Ok(AuthzMode::Advisory),
            "strict" | "" => Ok(AuthzMode::Strict),
            other => Err(format!("unknown AUTHZ_MODE '{other}'")),
        }
    }
}

/// Well-known codes of the security system seeded by the initial migration.
pub mod codes {
    pub const SECURITY_SYSTEM: &str = "SEG";

    pub const SYSTEMS: &str = "SEG_SISTEMAS";
    pub const USERS: &str = "SEG_USUARIOS";
    pub const BUTTONS: &str = "SEG_BOTOES";
    pub const GROUPS: &str = "SEG_GRUPOS";
    pub const AUDIT: &str = "SEG_AUDITORIA";

    pub const ADMIN_GROUP: &str = "ADMIN";
}
