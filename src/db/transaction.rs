//! Transaction scope shared by every reconciler operation.
//!
//! A [`ScopedTransaction`] is finalized exactly once. `finish(Ok)` commits,
//! `finish(Err)` rolls back and hands the original error back even when the
//! rollback itself fails. A scope that is dropped without `finish` (the
//! caller's future was cancelled, or a panic unwound through it) still rolls
//! back: `sqlx` queues a `ROLLBACK` before the connection goes back to the
//! pool.

use sqlx::{PgConnection, Postgres, Transaction};
use tracing::{debug, warn};

use crate::error::{ReconcileError, Result};

pub struct ScopedTransaction {
    tx: Transaction<'static, Postgres>,
    guard: AbandonGuard,
}

impl ScopedTransaction {
    pub(crate) fn new(database: &str, tx: Transaction<'static, Postgres>) -> Self {
        debug!(database, "transaction started");
        Self {
            tx,
            guard: AbandonGuard {
                database: database.to_string(),
                armed: true,
            },
        }
    }

    pub fn database(&self) -> &str {
        &self.guard.database
    }

    /// Connection the unit of work runs its statements on.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        let Self { tx, mut guard } = self;
        guard.armed = false;
        let database = guard.database.as_str();

        match result {
            Ok(value) => {
                tx.commit().await.map_err(ReconcileError::Commit)?;
                debug!(database, "transaction committed");
                Ok(value)
            }
            Err(err) => {
                match tx.rollback().await {
                    Ok(()) => debug!(database, error = %err, "transaction rolled back"),
                    Err(rollback) => warn!(
                        database,
                        error = %err,
                        rollback_error = %ReconcileError::Rollback(rollback),
                        "rollback failed after error; connection will be discarded"
                    ),
                }
                Err(err)
            }
        }
    }
}

struct AbandonGuard {
    database: String,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                database = %self.database,
                "transaction scope dropped before completion; rolling back"
            );
        }
    }
}
