//! Temporary role membership for `ALTER DEFAULT PRIVILEGES FOR ROLE`.
//!
//! Only members of the owner role (or superusers) may alter its default
//! privileges. When the acting role is neither, it is granted membership for
//! the duration of the operation and the grant is revoked before the
//! transaction ends, whatever the outcome of the work in between.
//!
//! The membership check and the `GRANT` run on the caller's transaction, so
//! a concurrent operation cannot see or revoke a grant it did not make.

use sqlx::{Executor, PgConnection};
use tracing::{debug, info, warn};

use crate::db::{Feature, FeatureSet, quote_ident};
use crate::error::{CleanupWarning, ReconcileError, Result};

const ELEVATED_SAVEPOINT: &str = "pgreconcile_elevated";
const REVOKE_SAVEPOINT: &str = "pgreconcile_revoke";

#[derive(Debug, sqlx::FromRow)]
struct ActingRole {
    member: String,
    is_superuser: bool,
    is_member: bool,
}

/// Proof that the acting role may act for `owner` inside the current
/// transaction. Must be released with [`RoleElevation::release`].
#[derive(Debug)]
#[must_use = "a granted membership must be released"]
pub struct RoleElevation {
    owner: String,
    member: String,
    superuser: bool,
    granted: bool,
}

/// Direct membership only. From PostgreSQL 16 a grant without the SET option
/// (e.g. the ADMIN-only grant a CREATEROLE user receives on roles it creates)
/// does not allow acting for the owner, so it does not count.
fn acting_role_query(features: &FeatureSet) -> String {
    let set_option = if features.supports(Feature::RoleGrantOptions) {
        " AND m.set_option"
    } else {
        ""
    };
    format!(
        r#"SELECT current_user::text AS member,
                  r.rolsuper AS is_superuser,
                  EXISTS (
                      SELECT 1
                      FROM pg_catalog.pg_auth_members m
                      JOIN pg_catalog.pg_roles o ON o.oid = m.roleid
                      WHERE m.member = r.oid AND o.rolname = $1{set_option}
                  ) AS is_member
           FROM pg_catalog.pg_roles r
           WHERE r.rolname = current_user"#
    )
}

impl RoleElevation {
    pub async fn acquire(conn: &mut PgConnection, owner: &str, features: &FeatureSet) -> Result<Self> {
        let query = acting_role_query(features);
        let acting: ActingRole = sqlx::query_as(&query)
            .bind(owner)
            .fetch_one(&mut *conn)
            .await
            .map_err(ReconcileError::catalog("acting role membership"))?;

        let mut elevation = Self {
            owner: owner.to_string(),
            member: acting.member,
            superuser: acting.is_superuser,
            granted: false,
        };

        if elevation.member == owner || acting.is_superuser || acting.is_member {
            debug!(
                owner,
                member = %elevation.member,
                superuser = acting.is_superuser,
                "no membership grant needed"
            );
            return Ok(elevation);
        }

        let grant = format!("GRANT {} TO {}", quote_ident(owner), quote_ident(&elevation.member));
        (&mut *conn).execute(sqlx::raw_sql(&grant))
            .await
            .map_err(|source| elevation.membership_error(source))?;
        elevation.granted = true;

        (&mut *conn).execute(sqlx::raw_sql(&format!("SAVEPOINT {ELEVATED_SAVEPOINT}")))
            .await
            .map_err(ReconcileError::statement("set savepoint after membership grant"))?;

        info!(owner, member = %elevation.member, "temporarily granted role membership");
        Ok(elevation)
    }

    /// Whether the acting role depends on membership in `owner` at all.
    pub fn depends_on_membership(&self) -> bool {
        !self.superuser && self.member != self.owner
    }

    /// Maps a statement failure while acting for `owner`. Losing the
    /// privilege mid-operation is a membership failure, not a plain
    /// statement error.
    pub fn classify(&self, intent: impl Into<String>, source: sqlx::Error) -> ReconcileError {
        if self.depends_on_membership() && ReconcileError::is_insufficient_privilege(&source) {
            self.membership_error(source)
        } else {
            ReconcileError::statement(intent)(source)
        }
    }

    /// Revokes a membership this elevation granted. When `failed` is set the
    /// work done since the grant is rolled back to the savepoint first, so
    /// the `REVOKE` can still run on an aborted transaction.
    ///
    /// Failures here never replace the primary outcome; they come back as
    /// warnings.
    pub async fn release(self, conn: &mut PgConnection, failed: bool) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();
        if !self.granted {
            return warnings;
        }

        if failed
            && let Err(e) = (&mut *conn).execute(sqlx::raw_sql(&format!("ROLLBACK TO SAVEPOINT {ELEVATED_SAVEPOINT}")))
                .await
        {
            warn!(owner = %self.owner, error = %e, "cannot roll back to membership savepoint");
            warnings.push(CleanupWarning {
                step: "rollback to membership savepoint".to_string(),
                message: e.to_string(),
            });
        }

        if let Err(e) = self.revoke(conn).await {
            warn!(
                owner = %self.owner,
                member = %self.member,
                error = %e,
                "failed to revoke temporary role membership"
            );
            warnings.push(CleanupWarning {
                step: format!("revoke {} from {}", self.owner, self.member),
                message: e.to_string(),
            });
        } else {
            info!(owner = %self.owner, member = %self.member, "revoked temporary role membership");
        }

        warnings
    }

    async fn revoke(&self, conn: &mut PgConnection) -> std::result::Result<(), sqlx::Error> {
        (&mut *conn).execute(sqlx::raw_sql(&format!("SAVEPOINT {REVOKE_SAVEPOINT}")))
            .await?;

        let revoke = format!(
            "REVOKE {} FROM {}",
            quote_ident(&self.owner),
            quote_ident(&self.member)
        );
        match (&mut *conn).execute(sqlx::raw_sql(&revoke)).await {
            Ok(_) => {
                (&mut *conn).execute(sqlx::raw_sql(&format!("RELEASE SAVEPOINT {REVOKE_SAVEPOINT}")))
                    .await?;
                Ok(())
            }
            Err(e) => {
                // Keep the enclosing transaction usable for the caller.
                if let Err(rollback) =
                    (&mut *conn).execute(sqlx::raw_sql(&format!("ROLLBACK TO SAVEPOINT {REVOKE_SAVEPOINT}")))
                        .await
                {
                    warn!(
                        owner = %self.owner,
                        error = %rollback,
                        "cannot roll back to revoke savepoint"
                    );
                }
                Err(e)
            }
        }
    }

    fn membership_error(&self, source: sqlx::Error) -> ReconcileError {
        ReconcileError::Membership {
            member: self.member.clone(),
            role: self.owner.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elevation(member: &str, superuser: bool) -> RoleElevation {
        RoleElevation {
            owner: "app_owner".to_string(),
            member: member.to_string(),
            superuser,
            granted: false,
        }
    }

    #[test]
    fn only_non_owner_non_superusers_depend_on_membership() {
        assert!(elevation("deployer", false).depends_on_membership());
        assert!(!elevation("app_owner", false).depends_on_membership());
        assert!(!elevation("postgres", true).depends_on_membership());
    }

    #[test]
    fn set_option_only_counts_from_pg16() {
        use crate::db::ServerVersion;

        let pg15 = acting_role_query(&FeatureSet::for_version(ServerVersion::new(15, 0)));
        assert!(!pg15.contains("set_option"));
        assert!(pg15.contains("pg_auth_members"));

        let pg16 = acting_role_query(&FeatureSet::for_version(ServerVersion::new(16, 2)));
        assert!(pg16.contains("AND m.set_option"));
    }

    #[test]
    fn non_database_errors_stay_statement_errors() {
        let err = elevation("deployer", false).classify("grant select", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, ReconcileError::Statement { .. }));
        assert!(!err.is_membership());
    }
}
