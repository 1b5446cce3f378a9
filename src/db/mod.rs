//! Connection plumbing: descriptors, database-scoped pools, the server
//! feature gate, transaction scopes and SQL quoting.

pub mod descriptor;
pub mod director;
pub mod features;
pub mod quote;
pub mod transaction;

pub use descriptor::{ConnectionDescriptor, SslMode};
pub use director::{Director, TargetDatabase};
pub use features::{FEATURE_TABLE, Feature, FeatureSet, ServerVersion};
pub use quote::{quote_grantee, quote_ident, quote_literal};
pub use transaction::ScopedTransaction;
