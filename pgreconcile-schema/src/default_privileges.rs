use pgreconcile_acl::{AclError, ObjectType, PrivilegeSet};
use serde::{Deserialize, Serialize};

/// Declared default-privilege rule: objects of `object_type` created by
/// `owner` (in `schema`, or anywhere in the database when `schema` is unset)
/// get `privileges` granted to `role`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPrivilegesSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    pub owner: String,

    /// Grantee. `public` targets the PUBLIC pseudo-role.
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    pub object_type: ObjectType,

    /// Privilege tokens; `ALL` expands to every privilege valid for the
    /// object type.
    #[serde(default)]
    pub privileges: Vec<String>,
}

impl DefaultPrivilegesSpec {
    pub fn new(
        owner: impl Into<String>,
        role: impl Into<String>,
        object_type: ObjectType,
    ) -> Self {
        Self {
            database: None,
            owner: owner.into(),
            role: role.into(),
            schema: None,
            object_type,
            privileges: Vec::new(),
        }
    }

    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_privileges<I, S>(mut self, privileges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privileges = privileges.into_iter().map(Into::into).collect();
        self
    }

    pub fn resolve_privileges(&self) -> Result<PrivilegeSet, AclError> {
        self.object_type.expand(&self.privileges)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPrivilegesState {
    pub database: String,
    pub owner: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub object_type: ObjectType,
    pub privileges: PrivilegeSet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgreconcile_acl::Privilege;

    #[test]
    fn deserializes_and_resolves_privileges() {
        let spec: DefaultPrivilegesSpec = serde_json::from_str(
            r#"{
                "database": "app",
                "owner": "app_owner",
                "role": "reader",
                "schema": "test_schema",
                "object_type": "table",
                "privileges": ["select"]
            }"#,
        )
        .unwrap();

        assert_eq!(spec.object_type, ObjectType::Table);
        assert_eq!(
            spec.resolve_privileges().unwrap(),
            PrivilegeSet::from([Privilege::Select])
        );
    }

    #[test]
    fn resolve_rejects_invalid_tokens() {
        let spec = DefaultPrivilegesSpec::new("o", "r", ObjectType::Sequence)
            .with_privileges(["EXECUTE"]);
        assert!(spec.resolve_privileges().is_err());
    }
}
