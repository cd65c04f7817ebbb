use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;

/// Operation letter of the ACEI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Action {
    /// Update an existing record.
    #[serde(rename = "A")]
    Alter,
    /// Read / list records.
    #[serde(rename = "C")]
    Consult,
    /// Delete a record.
    #[serde(rename = "E")]
    Exclude,
    /// Create a record.
    #[serde(rename = "I")]
    Include,
}

impl Action {
    /// Canonical order used when rendering an action string.
    pub const ALL: [Action; 4] = [Action::Alter, Action::Consult, Action::Exclude, Action::Include];

    pub fn letter(self) -> char {
        match self {
            Action::Alter => 'A',
            Action::Consult => 'C',
            Action::Exclude => 'E',
            Action::Include => 'I',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'A' => Some(Action::Alter),
            'C' => Some(Action::Consult),
            'E' => Some(Action::Exclude),
            'I' => Some(Action::Include),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Action::Alter => 0b0001,
            Action::Consult => 0b0010,
            Action::Exclude => 0b0100,
            Action::Include => 0b1000,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) => {
                Action::from_letter(letter).ok_or_else(|| format!("unknown action '{letter}'"))
            }
            _ => Err(format!("invalid action '{s}', expected one of A, C, E, I")),
        }
    }
}

/// Set of ACEI actions, rendered in canonical order ("ACEI", "CI", ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ActionSet(u8);

impl ActionSet {
    pub const EMPTY: ActionSet = ActionSet(0);

    pub fn all() -> Self {
        Action::ALL.into_iter().collect()
    }

    pub fn contains(self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn insert(&mut self, action: Action) {
        self.0 |= action.bit();
    }

    pub fn union(self, other: ActionSet) -> ActionSet {
        ActionSet(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Action> {
        Action::ALL.into_iter().filter(move |action| self.contains(*action))
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        let mut set = ActionSet::EMPTY;
        for action in iter {
            set.insert(action);
        }
        set
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for action in self.iter() {
            write!(f, "{}", action.letter())?;
        }
        Ok(())
    }
}

/// Letters in any order and case; whitespace ignored; repeats collapse.
impl FromStr for ActionSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = ActionSet::EMPTY;
        for letter in s.chars().filter(|c| !c.is_whitespace()) {
            let action = Action::from_letter(letter).ok_or_else(|| format!("unknown action '{letter}'"))?;
            set.insert(action);
        }
        Ok(set)
    }
}

impl Serialize for ActionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_any_order_and_case() {
        let set: ActionSet = "ie c".parse().unwrap();
        assert!(set.contains(Action::Include));
        assert!(set.contains(Action::Exclude));
        assert!(set.contains(Action::Consult));
        assert!(!set.contains(Action::Alter));
        assert_eq!(set.to_string(), "CEI");
    }

    #[test]
    fn rejects_unknown_letters() {
        assert!("ACX".parse::<ActionSet>().is_err());
    }

    #[test]
    fn empty_string_is_empty_set() {
        let set: ActionSet = "".parse().unwrap();
        assert!(set.is_empty());
        assert_eq!(set.to_string(), "");
    }

    #[test]
    fn union_merges_letters() {
        let a: ActionSet = "C".parse().unwrap();
        let b: ActionSet = "IA".parse().unwrap();
        assert_eq!(a.union(b).to_string(), "ACI");
        assert_eq!(ActionSet::all().to_string(), "ACEI");
    }

    #[test]
    fn serde_uses_letter_strings() {
        let set: ActionSet = "EC".parse().unwrap();
        assert_eq!(serde_json::to_value(set).unwrap(), serde_json::json!("CE"));
        let action: Action = serde_json::from_str("\"I\"").unwrap();
        assert_eq!(action, Action::Include);
    }
}
