use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Action, ActionSet, Restriction};

/// One group-level grant row: a group may perform `actions` on a function
/// of a system, with the given data restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    pub group_code: String,
    pub system_code: String,
    pub function_code: String,
    pub actions: ActionSet,
    pub restriction: Restriction,
}

/// Effective access to one function after merging every group of the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FunctionAccess {
    #[schema(value_type = String, example = "ACEI")]
    pub actions: ActionSet,
    pub restriction: Restriction,
}

impl FunctionAccess {
    fn merge(&mut self, actions: ActionSet, restriction: Restriction) {
        self.actions = self.actions.union(actions);
        self.restriction = self.restriction.most_restrictive(restriction);
    }
}

/// Aggregated permissions of an authenticated user, keyed by system code and
/// then function code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserPermissions {
    pub user_id: i64,
    #[schema(value_type = Object)]
    pub systems: BTreeMap<String, BTreeMap<String, FunctionAccess>>,
}

impl UserPermissions {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            systems: BTreeMap::new(),
        }
    }

    /// Union of actions, most restrictive restriction wins. Grants with no
    /// actions contribute nothing, not even their restriction.
    pub fn aggregate(user_id: i64, grants: impl IntoIterator<Item = PermissionGrant>) -> Self {
        let mut permissions = Self::new(user_id);
        for grant in grants {
            permissions.merge(&grant.system_code, &grant.function_code, grant.actions, grant.restriction);
        }
        permissions
    }

    fn merge(&mut self, system: &str, function: &str, actions: ActionSet, restriction: Restriction) {
        if actions.is_empty() {
            return;
        }

        let functions = self.systems.entry(key(system)).or_default();
        match functions.get_mut(&key(function)) {
            Some(access) => access.merge(actions, restriction),
            None => {
                functions.insert(key(function), FunctionAccess { actions, restriction });
            }
        }
    }

    pub fn has_system(&self, system: &str) -> bool {
        self.systems.contains_key(&key(system))
    }

    pub fn access(&self, system: &str, function: &str) -> Option<&FunctionAccess> {
        self.systems.get(&key(system))?.get(&key(function))
    }

    pub fn can(&self, system: &str, function: &str, action: Action) -> bool {
        self.access(system, function)
            .map(|access| access.actions.contains(action))
            .unwrap_or(false)
    }

    pub fn restriction(&self, system: &str, function: &str) -> Option<Restriction> {
        self.access(system, function).map(|access| access.restriction)
    }

    pub fn system_codes(&self) -> impl Iterator<Item = &str> {
        self.systems.keys().map(String::as_str)
    }

    pub fn function_codes<'a>(&'a self, system: &str) -> impl Iterator<Item = &'a str> {
        self.systems
            .get(&key(system))
            .into_iter()
            .flat_map(|functions| functions.keys().map(String::as_str))
    }

    /// Compact form `SYS|FUNC|ACEI|R`, one entry per function.
    pub fn to_claims(&self) -> Vec<String> {
        self.systems
            .iter()
            .flat_map(|(system, functions)| {
                functions.iter().map(move |(function, access)| {
                    format!("{}|{}|{}|{}", system, function, access.actions, access.restriction)
                })
            })
            .collect()
    }

    pub fn from_claims<I, S>(user_id: i64, claims: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut permissions = Self::new(user_id);
        for claim in claims {
            let claim = claim.as_ref();
            let parts: Vec<&str> = claim.split('|').collect();
            let [system, function, actions, restriction] = parts.as_slice() else {
                return Err(format!("malformed permission claim '{claim}'"));
            };
            if system.trim().is_empty() || function.trim().is_empty() {
                return Err(format!("malformed permission claim '{claim}'"));
            }
            permissions.merge(system, function, actions.parse()?, restriction.parse()?);
        }
        Ok(permissions)
    }
}

fn key(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
