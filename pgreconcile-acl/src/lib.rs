pub mod diff;
pub mod object_type;
pub mod privilege;

pub use diff::{DiffScope, PrivilegeDiff, diff, diff_keyed};
pub use object_type::ObjectType;
pub use privilege::{AclError, Privilege, PrivilegeSet};
