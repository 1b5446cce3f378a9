use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::privilege::{AclError, Privilege, PrivilegeSet};

/// Object classes that `ALTER DEFAULT PRIVILEGES` can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Table,
    Sequence,
    Function,
    Type,
    Schema,
}

impl ObjectType {
    pub const ALL: [ObjectType; 5] = [
        ObjectType::Table,
        ObjectType::Sequence,
        ObjectType::Function,
        ObjectType::Type,
        ObjectType::Schema,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Table => "table",
            ObjectType::Sequence => "sequence",
            ObjectType::Function => "function",
            ObjectType::Type => "type",
            ObjectType::Schema => "schema",
        }
    }

    /// `pg_default_acl.defaclobjtype`
    pub fn catalog_code(&self) -> char {
        match self {
            ObjectType::Table => 'r',
            ObjectType::Sequence => 'S',
            ObjectType::Function => 'f',
            ObjectType::Type => 'T',
            ObjectType::Schema => 'n',
        }
    }

    /// Object type code understood by `acldefault()`. It differs from the
    /// `pg_default_acl` code for sequences: `S` there is a foreign server.
    pub fn acldefault_code(&self) -> char {
        match self {
            ObjectType::Sequence => 's',
            other => other.catalog_code(),
        }
    }

    /// Keyword used after `ON` in `ALTER DEFAULT PRIVILEGES`.
    pub fn sql_plural(&self) -> &'static str {
        match self {
            ObjectType::Table => "TABLES",
            ObjectType::Sequence => "SEQUENCES",
            ObjectType::Function => "FUNCTIONS",
            ObjectType::Type => "TYPES",
            ObjectType::Schema => "SCHEMAS",
        }
    }

    /// Privileges that may appear in a default ACL for this object type.
    pub fn allowed_privileges(&self) -> PrivilegeSet {
        match self {
            ObjectType::Table => PrivilegeSet::from([
                Privilege::Select,
                Privilege::Insert,
                Privilege::Update,
                Privilege::Delete,
                Privilege::Truncate,
                Privilege::References,
                Privilege::Trigger,
                Privilege::Maintain,
            ]),
            ObjectType::Sequence => {
                PrivilegeSet::from([Privilege::Usage, Privilege::Select, Privilege::Update])
            }
            ObjectType::Function => PrivilegeSet::from([Privilege::Execute]),
            ObjectType::Type => PrivilegeSet::from([Privilege::Usage]),
            ObjectType::Schema => PrivilegeSet::from([Privilege::Usage, Privilege::Create]),
        }
    }

    /// Resolves user tokens into a privilege set, expanding `ALL`.
    ///
    /// `ALL` leaves out `MAINTAIN`, which only exists on PostgreSQL 17+.
    pub fn expand<I, S>(&self, tokens: I) -> Result<PrivilegeSet, AclError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = PrivilegeSet::new();
        for token in tokens {
            let token = token.as_ref();
            if token.trim().eq_ignore_ascii_case("ALL") {
                self.allowed_privileges()
                    .iter()
                    .filter(|p| *p != Privilege::Maintain)
                    .for_each(|p| {
                        out.insert(p);
                    });
            } else {
                out.insert(token.parse()?);
            }
        }
        self.validate(&out)?;
        Ok(out)
    }

    pub fn validate(&self, privileges: &PrivilegeSet) -> Result<(), AclError> {
        let allowed = self.allowed_privileges();
        match privileges.iter().find(|p| !allowed.contains(*p)) {
            Some(privilege) => Err(AclError::NotApplicable {
                privilege,
                object_type: self.as_str(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        ObjectType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| AclError::UnknownObjectType(token.to_string()))
    }
}
