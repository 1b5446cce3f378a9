pub mod default_privileges;
pub mod extension;
pub mod observed;
pub mod role;
pub mod schema;

pub use default_privileges::{DefaultPrivilegesSpec, DefaultPrivilegesState};
pub use extension::{ExtensionSpec, ExtensionState};
pub use observed::Observed;
pub use role::{RoleAttributes, RoleSpec, RoleState};
pub use schema::{SchemaSpec, SchemaState};

pub use pgreconcile_acl::{ObjectType, Privilege, PrivilegeSet};
