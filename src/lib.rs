pub mod config;
pub mod converge;
pub mod db;
pub mod error;
pub mod reconcilers;
pub mod resource_id;
mod utils;

pub use converge::{Action, Converger, Report};
pub use db::{ConnectionDescriptor, Director, Feature, FeatureSet, ServerVersion};
pub use error::{CleanupWarning, ReconcileError, Result, ResultExt};
pub use reconcilers::{
    Applied, DefaultPrivilegesReconciler, ExtensionReconciler, Reconciler, RoleReconciler,
    SchemaReconciler, UpdateOutcome,
};
pub use resource_id::{ResourceId, ResourceKind};

pub use pgreconcile_acl as acl;
pub use pgreconcile_schema as schema;
