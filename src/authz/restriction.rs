use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Data visibility attached to a grant. Ordered from least to most
/// restrictive, so `max` picks the winner when groups overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, ToSchema)]
pub enum Restriction {
    #[default]
    #[serde(rename = "L")]
    Liberal,
    #[serde(rename = "P")]
    Partial,
    #[serde(rename = "C")]
    Closed,
}

impl Restriction {
    pub fn letter(self) -> char {
        match self {
            Restriction::Liberal => 'L',
            Restriction::Partial => 'P',
            Restriction::Closed => 'C',
        }
    }

    pub fn most_restrictive(self, other: Restriction) -> Restriction {
        self.max(other)
    }
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Restriction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L" => Ok(Restriction::Liberal),
            "P" => Ok(Restriction::Partial),
            "C" => Ok(Restriction::Closed),
            other => Err(format!("invalid restriction '{other}', expected L, P or C")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_beats_partial_beats_liberal() {
        assert_eq!(Restriction::Liberal.most_restrictive(Restriction::Partial), Restriction::Partial);
        assert_eq!(Restriction::Closed.most_restrictive(Restriction::Partial), Restriction::Closed);
        assert_eq!(Restriction::Liberal.most_restrictive(Restriction::Liberal), Restriction::Liberal);
    }

    #[test]
    fn parses_letters() {
        assert_eq!(" p ".parse::<Restriction>().unwrap(), Restriction::Partial);
        assert!("X".parse::<Restriction>().is_err());
    }
}
