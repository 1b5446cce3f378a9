use pgreconcile_schema::{DefaultPrivilegesSpec, ExtensionSpec, RoleSpec, SchemaSpec};
use serde::{Deserialize, Serialize};

/// Desired state, one list per resource kind. Applied roles first, then
/// schemas, extensions and default privileges; destroyed in reverse.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Manifest {
    /// TOML: `[[resources.roles]]`.
    #[serde(default)]
    pub roles: Vec<RoleSpec>,

    /// TOML: `[[resources.schemas]]`.
    #[serde(default)]
    pub schemas: Vec<SchemaSpec>,

    /// TOML: `[[resources.extensions]]`.
    #[serde(default)]
    pub extensions: Vec<ExtensionSpec>,

    /// TOML: `[[resources.default_privileges]]`.
    #[serde(default)]
    pub default_privileges: Vec<DefaultPrivilegesSpec>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
            && self.schemas.is_empty()
            && self.extensions.is_empty()
            && self.default_privileges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.roles.len() + self.schemas.len() + self.extensions.len() + self.default_privileges.len()
    }
}
