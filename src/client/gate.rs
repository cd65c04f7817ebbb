use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::authz::{Action, UserPermissions};
use crate::models::button::Button;

/// Permission needed to render a UI element, written `SYS`, `SYS:FUNC` or
/// `SYS:FUNC:ACTION`.
///
/// `SYS` asks for any access to the system, `SYS:FUNC` for any action on
/// the function, and the full form for one ACEI letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub system: String,
    pub function: Option<String>,
    pub action: Option<Action>,
}

impl Requirement {
    pub fn system(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            function: None,
            action: None,
        }
    }

    pub fn function(system: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            function: Some(function.into()),
            action: None,
        }
    }

    pub fn action(system: impl Into<String>, function: impl Into<String>, action: Action) -> Self {
        Self {
            system: system.into(),
            function: Some(function.into()),
            action: Some(action),
        }
    }
}

impl FromStr for Requirement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(format!("malformed permission requirement '{s}'"));
        }

        match parts.as_slice() {
            [system] => Ok(Requirement::system(*system)),
            [system, function] => Ok(Requirement::function(*system, *function)),
            [system, function, action] => Ok(Requirement::action(*system, *function, action.parse()?)),
            _ => Err(format!("malformed permission requirement '{s}'")),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.system)?;
        if let Some(function) = &self.function {
            write!(f, ":{function}")?;
        }
        if let Some(action) = self.action {
            write!(f, ":{action}")?;
        }
        Ok(())
    }
}

/// Decides which elements of a screen a user may see.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    permissions: Arc<UserPermissions>,
}

impl PermissionGate {
    pub fn new(permissions: Arc<UserPermissions>) -> Self {
        Self { permissions }
    }

    pub fn permissions(&self) -> &UserPermissions {
        &self.permissions
    }

    pub fn allows(&self, requirement: &Requirement) -> bool {
        let permissions = &self.permissions;
        match (&requirement.function, requirement.action) {
            (None, _) => permissions.has_system(&requirement.system),
            (Some(function), None) => permissions.access(&requirement.system, function).is_some(),
            (Some(function), Some(action)) => permissions.can(&requirement.system, function, action),
        }
    }

    /// String form used in templates; a malformed requirement hides the element.
    pub fn allows_str(&self, requirement: &str) -> bool {
        match requirement.parse::<Requirement>() {
            Ok(requirement) => self.allows(&requirement),
            Err(err) => {
                tracing::warn!(requirement, error = %err, "ignoring malformed permission requirement");
                false
            }
        }
    }

    /// Active buttons whose action the user holds, in display order.
    pub fn visible_buttons(&self, buttons: impl IntoIterator<Item = Button>) -> Vec<Button> {
        let mut visible: Vec<Button> = buttons
            .into_iter()
            .filter(|button| button.active)
            .filter(|button| {
                self.permissions
                    .can(&button.system_code, &button.function_code, button.action)
            })
            .collect();
        visible.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));
        visible
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::authz::{PermissionGrant, Restriction};

    fn gate() -> PermissionGate {
        let grants = vec![
            PermissionGrant {
                group_code: "RH".to_string(),
                system_code: "SEG".to_string(),
                function_code: "SEG_USUARIOS".to_string(),
                actions: "CI".parse().unwrap(),
                restriction: Restriction::Partial,
            },
            PermissionGrant {
                group_code: "RH".to_string(),
                system_code: "FOLHA".to_string(),
                function_code: "FOL_CALCULO".to_string(),
                actions: "C".parse().unwrap(),
                restriction: Restriction::Liberal,
            },
        ];
        PermissionGate::new(Arc::new(UserPermissions::aggregate(1, grants)))
    }

    fn button(id: i64, function: &str, action: Action, sort_order: i64, active: bool) -> Button {
        Button {
            id,
            system_code: "SEG".to_string(),
            function_code: function.to_string(),
            label: format!("button {id}"),
            action,
            icon: None,
            sort_order,
            active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn parses_requirement_forms() {
        assert_eq!("SEG".parse::<Requirement>().unwrap(), Requirement::system("SEG"));
        assert_eq!(
            " SEG : SEG_USUARIOS ".parse::<Requirement>().unwrap(),
            Requirement::function("SEG", "SEG_USUARIOS")
        );
        let full: Requirement = "SEG:SEG_USUARIOS:i".parse().unwrap();
        assert_eq!(full.action, Some(Action::Include));
        assert_eq!(full.to_string(), "SEG:SEG_USUARIOS:I");

        assert!("".parse::<Requirement>().is_err());
        assert!("SEG::C".parse::<Requirement>().is_err());
        assert!("SEG:SEG_USUARIOS:X".parse::<Requirement>().is_err());
        assert!("SEG:SEG_USUARIOS:C:L".parse::<Requirement>().is_err());
    }

    #[test]
    fn evaluates_each_level() {
        let gate = gate();

        assert!(gate.allows_str("SEG"));
        assert!(gate.allows_str("seg:seg_usuarios"));
        assert!(gate.allows_str("SEG:SEG_USUARIOS:I"));
        assert!(!gate.allows_str("SEG:SEG_USUARIOS:E"));
        assert!(!gate.allows_str("SEG:SEG_BOTOES"));
        assert!(!gate.allows_str("PONTO"));
        assert!(!gate.allows_str("SEG:SEG_USUARIOS:Z"));
    }

    #[test]
    fn filters_and_orders_buttons() {
        let gate = gate();
        let buttons = vec![
            button(1, "SEG_USUARIOS", Action::Exclude, 1, true),
            button(2, "SEG_USUARIOS", Action::Include, 3, true),
            button(3, "SEG_USUARIOS", Action::Consult, 2, true),
            button(4, "SEG_USUARIOS", Action::Consult, 0, false),
            button(5, "SEG_BOTOES", Action::Consult, 0, true),
        ];

        let ids: Vec<i64> = gate.visible_buttons(buttons).into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }
}
