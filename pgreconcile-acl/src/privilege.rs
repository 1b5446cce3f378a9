use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum AclError {
    #[error("unknown privilege {0:?}")]
    UnknownPrivilege(String),

    #[error("unknown object type {0:?}")]
    UnknownObjectType(String),

    #[error("privilege {privilege} cannot be granted on {object_type}")]
    NotApplicable {
        privilege: Privilege,
        object_type: &'static str,
    },
}

/// A single privilege token as PostgreSQL spells it in `aclexplode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    Truncate,
    References,
    Trigger,
    Maintain,
    Usage,
    Create,
    Execute,
}

impl Privilege {
    pub const ALL: [Privilege; 11] = [
        Privilege::Select,
        Privilege::Insert,
        Privilege::Update,
        Privilege::Delete,
        Privilege::Truncate,
        Privilege::References,
        Privilege::Trigger,
        Privilege::Maintain,
        Privilege::Usage,
        Privilege::Create,
        Privilege::Execute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
            Privilege::Truncate => "TRUNCATE",
            Privilege::References => "REFERENCES",
            Privilege::Trigger => "TRIGGER",
            Privilege::Maintain => "MAINTAIN",
            Privilege::Usage => "USAGE",
            Privilege::Create => "CREATE",
            Privilege::Execute => "EXECUTE",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privilege {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        Privilege::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| AclError::UnknownPrivilege(token.to_string()))
    }
}

impl TryFrom<String> for Privilege {
    type Error = AclError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Privilege> for String {
    fn from(p: Privilege) -> Self {
        p.as_str().to_string()
    }
}

/// Order-independent set of privileges. Iteration order is stable so that
/// generated statements are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivilegeSet(BTreeSet<Privilege>);

impl PrivilegeSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parses user-supplied tokens. `ALL` is not handled here; see
    /// [`ObjectType::expand`](crate::ObjectType::expand).
    pub fn parse<I, S>(tokens: I) -> Result<Self, AclError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tokens
            .into_iter()
            .map(|t| t.as_ref().parse::<Privilege>())
            .collect()
    }

    pub fn insert(&mut self, privilege: Privilege) -> bool {
        self.0.insert(privilege)
    }

    pub fn contains(&self, privilege: Privilege) -> bool {
        self.0.contains(&privilege)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Privilege> + '_ {
        self.0.iter().copied()
    }

    /// `self − other`
    pub fn difference(&self, other: &PrivilegeSet) -> PrivilegeSet {
        Self(self.0.difference(&other.0).copied().collect())
    }

    pub fn union(&self, other: &PrivilegeSet) -> PrivilegeSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Comma-separated SQL privilege list, e.g. `SELECT, INSERT`.
    pub fn to_sql_list(&self) -> String {
        self.iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<Privilege> for PrivilegeSet {
    fn from_iter<T: IntoIterator<Item = Privilege>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Privilege; N]> for PrivilegeSet {
    fn from(value: [Privilege; N]) -> Self {
        value.into_iter().collect()
    }
}

impl fmt::Display for PrivilegeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_sql_list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive_and_trims() {
        assert_eq!(" select ".parse::<Privilege>(), Ok(Privilege::Select));
        assert_eq!("Execute".parse::<Privilege>(), Ok(Privilege::Execute));
        assert_eq!(
            "SELEKT".parse::<Privilege>(),
            Err(AclError::UnknownPrivilege("SELEKT".to_string()))
        );
    }

    #[test]
    fn set_equality_ignores_input_order_and_duplicates() {
        let a = PrivilegeSet::parse(["insert", "SELECT", "select"]).unwrap();
        let b = PrivilegeSet::parse(["SELECT", "INSERT"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.to_sql_list(), "SELECT, INSERT");
    }

    #[test]
    fn serde_uses_uppercase_tokens() {
        let set = PrivilegeSet::from([Privilege::Update, Privilege::Select]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["SELECT","UPDATE"]"#);

        let parsed: PrivilegeSet = serde_json::from_str(r#"["update","Select"]"#).unwrap();
        assert_eq!(parsed, set);

        assert!(serde_json::from_str::<PrivilegeSet>(r#"["bogus"]"#).is_err());
    }
}
