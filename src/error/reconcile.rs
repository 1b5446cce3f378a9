use serde::Serialize;
use thiserror::Error as ThisError;

use crate::db::{Feature, ServerVersion};
use crate::resource_id::{ResourceId, ResourceKind};

/// SQLSTATE `insufficient_privilege`.
const INSUFFICIENT_PRIVILEGE: &str = "42501";
/// SQLSTATE `invalid_catalog_name`: the target database does not exist.
const INVALID_CATALOG_NAME: &str = "3D000";

#[derive(Debug, ThisError)]
pub enum ReconcileError {
    #[error("cannot connect to database {database:?}: {source}")]
    Connection {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{feature} requires PostgreSQL {required}, server is {version}")]
    UnsupportedFeature {
        feature: Feature,
        required: ServerVersion,
        version: ServerVersion,
    },

    #[error("catalog read failed ({context}): {source}")]
    CatalogRead {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to {intent}: {source}")]
    Statement {
        intent: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("cannot make {member:?} a member of role {role:?}: {source}")]
    Membership {
        member: String,
        role: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("commit failed: {0}")]
    Commit(#[source] sqlx::Error),

    #[error("rollback failed: {0}")]
    Rollback(#[source] sqlx::Error),

    #[error("invalid resource id {id:?}: {reason}")]
    InvalidResourceId { id: String, reason: String },

    #[error("invalid {field}: {reason}")]
    InvalidAttribute { field: &'static str, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("{kind} {id}: {source}")]
    Resource {
        kind: ResourceKind,
        id: String,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    pub(crate) fn statement(intent: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let intent = intent.into();
        move |source| ReconcileError::Statement { intent, source }
    }

    pub(crate) fn catalog(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let context = context.into();
        move |source| ReconcileError::CatalogRead { context, source }
    }

    /// Malformed catalog value, as opposed to a failed query.
    pub(crate) fn malformed<E>(context: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ReconcileError::CatalogRead {
            context: context.into(),
            source: sqlx::Error::Decode(Box::new(err)),
        }
    }

    /// The error with resource context stripped.
    pub fn root(&self) -> &ReconcileError {
        match self {
            ReconcileError::Resource { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self.root(), ReconcileError::Connection { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.root(), ReconcileError::UnsupportedFeature { .. })
    }

    pub fn unsupported_feature(&self) -> Option<Feature> {
        match self.root() {
            ReconcileError::UnsupportedFeature { feature, .. } => Some(*feature),
            _ => None,
        }
    }

    /// Connection refused because the target database is gone.
    pub fn is_missing_database(&self) -> bool {
        self.is_connection() && self.sqlstate().as_deref() == Some(INVALID_CATALOG_NAME)
    }

    pub fn is_membership(&self) -> bool {
        matches!(self.root(), ReconcileError::Membership { .. })
    }

    /// SQLSTATE reported by the server, if the root cause came from it.
    pub fn sqlstate(&self) -> Option<String> {
        let source = match self.root() {
            ReconcileError::Connection { source, .. }
            | ReconcileError::CatalogRead { source, .. }
            | ReconcileError::Statement { source, .. }
            | ReconcileError::Membership { source, .. }
            | ReconcileError::Commit(source)
            | ReconcileError::Rollback(source) => source,
            _ => return None,
        };
        source
            .as_database_error()
            .and_then(|e| e.code())
            .map(|c| c.into_owned())
    }

    pub(crate) fn is_insufficient_privilege(err: &sqlx::Error) -> bool {
        err.as_database_error()
            .and_then(|e| e.code())
            .is_some_and(|c| c == INSUFFICIENT_PRIVILEGE)
    }
}

pub trait ResultExt<T> {
    /// Attaches resource kind and id to an error leaving an operation.
    fn for_resource(self, id: &ResourceId) -> Result<T, ReconcileError>;
}

impl<T> ResultExt<T> for Result<T, ReconcileError> {
    fn for_resource(self, id: &ResourceId) -> Result<T, ReconcileError> {
        self.map_err(|e| match e {
            already @ ReconcileError::Resource { .. } => already,
            other => ReconcileError::Resource {
                kind: id.kind(),
                id: id.encode(),
                source: Box::new(other),
            },
        })
    }
}

/// Failure of a cleanup step that ran after the primary outcome was decided.
/// Reported next to the result instead of replacing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupWarning {
    pub step: String,
    pub message: String,
}

impl std::fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}
