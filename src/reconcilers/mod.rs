//! Per-resource create/read/update/delete logic.
//!
//! Every operation follows the same shape: resolve the target database,
//! consult the feature gate, open one [`ScopedTransaction`], read the
//! catalog, emit the minimal statements, finish the scope.
//!
//! [`ScopedTransaction`]: crate::db::ScopedTransaction

pub mod default_privileges;
pub mod extension;
pub mod membership;
pub mod role;
pub mod schema;

pub use default_privileges::DefaultPrivilegesReconciler;
pub use extension::ExtensionReconciler;
pub use membership::RoleElevation;
pub use role::RoleReconciler;
pub use schema::SchemaReconciler;

use async_trait::async_trait;
use pgreconcile_schema::Observed;
use serde::Serialize;
use sqlx::{Executor, PgConnection};
use tracing::{debug, trace};

use crate::error::{CleanupWarning, ReconcileError, Result};
use crate::resource_id::{ResourceId, ResourceKind};

#[async_trait]
pub trait Reconciler: Send + Sync {
    type Desired: Send + Sync;
    type State: Send + Sync + Serialize;

    const KIND: ResourceKind;

    /// Id the resource will have once created from `desired`.
    fn desired_id(&self, desired: &Self::Desired) -> ResourceId;

    /// Id re-derived from catalog state, e.g. after a rename.
    fn state_id(&self, state: &Self::State) -> ResourceId;

    async fn create(&self, desired: &Self::Desired) -> Result<Applied<Self::State>>;

    async fn read(&self, id: &ResourceId) -> Result<Observed<Self::State>>;

    async fn update(
        &self,
        id: &ResourceId,
        desired: &Self::Desired,
    ) -> Result<UpdateOutcome<Self::State>>;

    async fn delete(&self, id: &ResourceId) -> Result<Applied<()>>;
}

/// Result of a mutating operation together with non-fatal cleanup failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied<T> {
    pub state: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CleanupWarning>,
}

impl<T> Applied<T> {
    pub fn new(state: T) -> Self {
        Self {
            state,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(state: T, warnings: Vec<CleanupWarning>) -> Self {
        Self { state, warnings }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome<T> {
    Updated(Applied<T>),
    /// The change cannot be made in place; the host should delete and
    /// recreate the resource.
    RequiresReplacement { reason: String },
}

impl<T> UpdateOutcome<T> {
    pub(crate) fn replace(reason: impl Into<String>) -> Self {
        UpdateOutcome::RequiresReplacement {
            reason: reason.into(),
        }
    }

    pub fn requires_replacement(&self) -> bool {
        matches!(self, UpdateOutcome::RequiresReplacement { .. })
    }
}

/// One mutating statement and what it is meant to achieve. Errors report the
/// intent rather than the SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub intent: String,
    /// Carries a secret; never logged.
    pub redact: bool,
}

impl Statement {
    pub fn new(sql: String, intent: impl Into<String>) -> Self {
        Self {
            sql,
            intent: intent.into(),
            redact: false,
        }
    }

    pub fn redacted(sql: String, intent: impl Into<String>) -> Self {
        Self {
            redact: true,
            ..Self::new(sql, intent)
        }
    }

    pub async fn execute(&self, conn: &mut PgConnection) -> Result<()> {
        self.execute_with(conn, |intent, source| ReconcileError::statement(intent)(source))
            .await
    }

    /// Like [`Statement::execute`], with the caller deciding how a database
    /// error is classified.
    pub async fn execute_with<F>(&self, conn: &mut PgConnection, on_error: F) -> Result<()>
    where
        F: FnOnce(String, sqlx::Error) -> ReconcileError + Send,
    {
        debug!(intent = %self.intent, "executing statement");
        if !self.redact {
            trace!(sql = %self.sql);
        }
        conn.execute(sqlx::raw_sql(&self.sql))
            .await
            .map_err(|source| on_error(self.intent.clone(), source))?;
        Ok(())
    }
}

pub(crate) fn require_non_empty(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ReconcileError::InvalidAttribute {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}
