use serde::{Deserialize, Serialize};

/// Declared cluster role. Attribute defaults mirror `CREATE ROLE`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,

    #[serde(default)]
    pub login: bool,

    #[serde(default)]
    pub superuser: bool,

    #[serde(default)]
    pub create_database: bool,

    #[serde(default)]
    pub create_role: bool,

    #[serde(default = "default_true")]
    pub inherit: bool,

    /// Requires PostgreSQL 9.1+.
    #[serde(default)]
    pub replication: bool,

    /// Requires PostgreSQL 9.5+.
    #[serde(default)]
    pub bypass_row_level_security: bool,

    /// `-1` means unlimited.
    #[serde(default = "default_connection_limit")]
    pub connection_limit: i32,

    /// Never read back from the catalog.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            login: false,
            superuser: false,
            create_database: false,
            create_role: false,
            inherit: true,
            replication: false,
            bypass_row_level_security: false,
            connection_limit: default_connection_limit(),
            password: None,
        }
    }

    pub fn with_login(mut self, password: impl Into<String>) -> Self {
        self.login = true;
        self.password = Some(password.into());
        self
    }

    /// The attribute part of a [`RoleSpec`], comparable with a [`RoleState`].
    pub fn attributes(&self) -> RoleAttributes {
        RoleAttributes {
            login: self.login,
            superuser: self.superuser,
            create_database: self.create_database,
            create_role: self.create_role,
            inherit: self.inherit,
            replication: self.replication,
            bypass_row_level_security: self.bypass_row_level_security,
            connection_limit: self.connection_limit,
        }
    }
}

impl std::fmt::Debug for RoleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleSpec")
            .field("name", &self.name)
            .field("attributes", &self.attributes())
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAttributes {
    pub login: bool,
    pub superuser: bool,
    pub create_database: bool,
    pub create_role: bool,
    pub inherit: bool,
    pub replication: bool,
    pub bypass_row_level_security: bool,
    pub connection_limit: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleState {
    pub name: String,
    #[serde(flatten)]
    pub attributes: RoleAttributes,
}

fn default_true() -> bool {
    true
}

fn default_connection_limit() -> i32 {
    -1
}
