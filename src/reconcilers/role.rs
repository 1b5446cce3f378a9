use async_trait::async_trait;
use pgreconcile_schema::{Observed, RoleAttributes, RoleSpec, RoleState};
use sqlx::PgConnection;
use tracing::debug;

use super::{Applied, Reconciler, Statement, UpdateOutcome, require_non_empty};
use crate::db::{Director, Feature, FeatureSet, quote_ident, quote_literal};
use crate::error::{ReconcileError, Result, ResultExt};
use crate::resource_id::{ResourceId, ResourceKind};

/// Cluster-wide roles. Every statement runs against the base database.
pub struct RoleReconciler {
    director: Director,
}

impl RoleReconciler {
    pub fn new(director: Director) -> Self {
        Self { director }
    }

    async fn create_inner(&self, desired: &RoleSpec) -> Result<RoleState> {
        require_non_empty("role name", &desired.name)?;
        let target = self.director.target(self.director.base_database())?;
        let features = target.features().await?;
        features.require(Feature::CreateRoleWith)?;
        let attributes = desired.attributes();
        require_attribute_features(&attributes, &features)?;

        let mut scope = target.begin().await?;
        let result: Result<RoleState> = async {
            let conn = scope.conn();
            create_statement(desired, &features).execute(conn).await?;
            read_back(conn, &desired.name, &features).await
        }
        .await;
        scope.finish(result).await
    }

    async fn read_inner(&self, name: &str) -> Result<Observed<RoleState>> {
        let target = self.director.target(self.director.base_database())?;
        let features = target.features().await?;
        let mut scope = target.begin().await?;
        let result = read_role(scope.conn(), name, &features).await;
        scope.finish(result).await
    }

    async fn update_inner(&self, name: &str, desired: &RoleSpec) -> Result<UpdateOutcome<RoleState>> {
        require_non_empty("role name", &desired.name)?;
        let target = self.director.target(self.director.base_database())?;
        let features = target.features().await?;
        let wanted = desired.attributes();
        require_attribute_features(&wanted, &features)?;

        let mut scope = target.begin().await?;
        let result: Result<UpdateOutcome<RoleState>> = async {
            let conn = scope.conn();
            let Observed::Present(current) = read_role(conn, name, &features).await? else {
                return Ok(UpdateOutcome::replace("role no longer exists"));
            };

            if current.name != desired.name {
                Statement::new(
                    format!(
                        "ALTER ROLE {} RENAME TO {}",
                        quote_ident(&current.name),
                        quote_ident(&desired.name)
                    ),
                    format!("rename role {} to {}", current.name, desired.name),
                )
                .execute(conn)
                .await?;
            }

            let clauses = attribute_changes(&current.attributes, &wanted, &features);
            if let Some(stmt) = alter_statement(&desired.name, &clauses, desired.password.as_deref()) {
                stmt.execute(conn).await?;
            } else {
                debug!(role = %desired.name, "role attributes already converged");
            }

            let state = read_back(conn, &desired.name, &features).await?;
            Ok(UpdateOutcome::Updated(Applied::new(state)))
        }
        .await;
        scope.finish(result).await
    }

    async fn delete_inner(&self, name: &str) -> Result<()> {
        let target = self.director.target(self.director.base_database())?;
        let mut scope = target.begin().await?;
        let result = Statement::new(
            format!("DROP ROLE IF EXISTS {}", quote_ident(name)),
            format!("drop role {name}"),
        )
        .execute(scope.conn())
        .await;
        scope.finish(result).await
    }
}

#[async_trait]
impl Reconciler for RoleReconciler {
    type Desired = RoleSpec;
    type State = RoleState;

    const KIND: ResourceKind = ResourceKind::Role;

    fn desired_id(&self, desired: &RoleSpec) -> ResourceId {
        ResourceId::role(&desired.name)
    }

    fn state_id(&self, state: &RoleState) -> ResourceId {
        ResourceId::role(&state.name)
    }

    async fn create(&self, desired: &RoleSpec) -> Result<Applied<RoleState>> {
        self.create_inner(desired)
            .await
            .map(Applied::new)
            .for_resource(&ResourceId::role(&desired.name))
    }

    async fn read(&self, id: &ResourceId) -> Result<Observed<RoleState>> {
        expect_kind(id)?;
        self.read_inner(id.segment(0)).await.for_resource(id)
    }

    async fn update(&self, id: &ResourceId, desired: &RoleSpec) -> Result<UpdateOutcome<RoleState>> {
        expect_kind(id)?;
        self.update_inner(id.segment(0), desired).await.for_resource(id)
    }

    async fn delete(&self, id: &ResourceId) -> Result<Applied<()>> {
        expect_kind(id)?;
        self.delete_inner(id.segment(0))
            .await
            .map(Applied::new)
            .for_resource(id)
    }
}

fn expect_kind(id: &ResourceId) -> Result<()> {
    if id.kind() == ResourceKind::Role {
        return Ok(());
    }
    Err(ReconcileError::InvalidResourceId {
        id: id.encode(),
        reason: format!("expected a role id, got a {} id", id.kind()),
    })
}

fn require_attribute_features(attributes: &RoleAttributes, features: &FeatureSet) -> Result<()> {
    if attributes.replication {
        features.require(Feature::Replication)?;
    }
    if attributes.bypass_row_level_security {
        features.require(Feature::RowLevelSecurity)?;
    }
    Ok(())
}

fn flag(on: bool, keyword: &str) -> String {
    if on {
        keyword.to_string()
    } else {
        format!("NO{keyword}")
    }
}

/// Every attribute the server understands, for `CREATE ROLE`.
fn attribute_clauses(attributes: &RoleAttributes, features: &FeatureSet) -> Vec<String> {
    let mut out = vec![
        flag(attributes.login, "LOGIN"),
        flag(attributes.superuser, "SUPERUSER"),
        flag(attributes.create_database, "CREATEDB"),
        flag(attributes.create_role, "CREATEROLE"),
        flag(attributes.inherit, "INHERIT"),
    ];
    if features.supports(Feature::Replication) {
        out.push(flag(attributes.replication, "REPLICATION"));
    }
    if features.supports(Feature::RowLevelSecurity) {
        out.push(flag(attributes.bypass_row_level_security, "BYPASSRLS"));
    }
    out.push(format!("CONNECTION LIMIT {}", attributes.connection_limit));
    out
}

/// Only the attributes that differ, for `ALTER ROLE`.
fn attribute_changes(
    current: &RoleAttributes,
    wanted: &RoleAttributes,
    features: &FeatureSet,
) -> Vec<String> {
    let all_current = attribute_clauses(current, features);
    attribute_clauses(wanted, features)
        .into_iter()
        .filter(|clause| !all_current.contains(clause))
        .collect()
}

fn with_password(mut sql: String, password: Option<&str>) -> String {
    if let Some(password) = password {
        sql.push_str(" PASSWORD ");
        sql.push_str(&quote_literal(password));
    }
    sql
}

fn create_statement(desired: &RoleSpec, features: &FeatureSet) -> Statement {
    let sql = format!(
        "CREATE ROLE {} WITH {}",
        quote_ident(&desired.name),
        attribute_clauses(&desired.attributes(), features).join(" ")
    );
    let intent = format!("create role {}", desired.name);
    match desired.password.as_deref() {
        Some(_) => Statement::redacted(with_password(sql, desired.password.as_deref()), intent),
        None => Statement::new(sql, intent),
    }
}

fn alter_statement(name: &str, clauses: &[String], password: Option<&str>) -> Option<Statement> {
    if clauses.is_empty() && password.is_none() {
        return None;
    }
    let mut sql = format!("ALTER ROLE {} WITH", quote_ident(name));
    for clause in clauses {
        sql.push(' ');
        sql.push_str(clause);
    }
    let intent = format!("alter role {name}");
    Some(match password {
        Some(_) => Statement::redacted(with_password(sql, password), intent),
        None => Statement::new(sql, intent),
    })
}

async fn read_role(
    conn: &mut PgConnection,
    name: &str,
    features: &FeatureSet,
) -> Result<Observed<RoleState>> {
    let replication = if features.supports(Feature::Replication) {
        "rolreplication"
    } else {
        "false"
    };
    let bypass_rls = if features.supports(Feature::RowLevelSecurity) {
        "rolbypassrls"
    } else {
        "false"
    };
    let query = format!(
        r#"SELECT rolname::text, rolcanlogin, rolsuper, rolcreatedb, rolcreaterole, rolinherit,
                  {replication} AS rolreplication, {bypass_rls} AS rolbypassrls, rolconnlimit
           FROM pg_catalog.pg_roles
           WHERE rolname = $1"#
    );

    #[allow(clippy::type_complexity)]
    let row: Option<(String, bool, bool, bool, bool, bool, bool, bool, i32)> =
        sqlx::query_as(&query)
            .bind(name)
            .fetch_optional(conn)
            .await
            .map_err(ReconcileError::catalog(format!("pg_roles {name}")))?;

    Ok(row
        .map(
            |(name, login, superuser, create_database, create_role, inherit, replication, bypass, limit)| {
                RoleState {
                    name,
                    attributes: RoleAttributes {
                        login,
                        superuser,
                        create_database,
                        create_role,
                        inherit,
                        replication,
                        bypass_row_level_security: bypass,
                        connection_limit: limit,
                    },
                }
            },
        )
        .into())
}

async fn read_back(conn: &mut PgConnection, name: &str, features: &FeatureSet) -> Result<RoleState> {
    read_role(conn, name, features)
        .await?
        .into_present()
        .ok_or_else(|| {
            ReconcileError::catalog(format!("role {name} missing after write"))(
                sqlx::Error::RowNotFound,
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ServerVersion;

    fn pg16() -> FeatureSet {
        FeatureSet::for_version(ServerVersion::new(16, 0))
    }

    #[test]
    fn create_role_spells_out_every_attribute() {
        let stmt = create_statement(&RoleSpec::new("reader"), &pg16());
        assert_eq!(
            stmt.sql,
            r#"CREATE ROLE "reader" WITH NOLOGIN NOSUPERUSER NOCREATEDB NOCREATEROLE INHERIT NOREPLICATION NOBYPASSRLS CONNECTION LIMIT -1"#
        );
        assert!(!stmt.redact);
    }

    #[test]
    fn password_statements_are_redacted() {
        let spec = RoleSpec::new("app").with_login("it's secret");
        let stmt = create_statement(&spec, &pg16());
        assert!(stmt.redact);
        assert!(stmt.sql.ends_with("PASSWORD 'it''s secret'"));
        assert!(!stmt.intent.contains("secret"));
    }

    #[test]
    fn old_servers_omit_newer_attributes() {
        let pg90 = FeatureSet::for_version(ServerVersion::new(9, 0));
        let clauses = attribute_clauses(&RoleSpec::new("r").attributes(), &pg90);
        assert!(!clauses.iter().any(|c| c.contains("REPLICATION")));
        assert!(!clauses.iter().any(|c| c.contains("BYPASSRLS")));

        let mut spec = RoleSpec::new("r");
        spec.replication = true;
        let err = require_attribute_features(&spec.attributes(), &pg90).unwrap_err();
        assert_eq!(err.unsupported_feature(), Some(Feature::Replication));
    }

    #[test]
    fn alter_only_touches_changed_attributes() {
        let current = RoleSpec::new("r").attributes();
        let mut wanted = current;
        wanted.login = true;
        wanted.connection_limit = 10;

        let clauses = attribute_changes(&current, &wanted, &pg16());
        assert_eq!(clauses, vec!["LOGIN".to_string(), "CONNECTION LIMIT 10".to_string()]);

        let stmt = alter_statement("r", &clauses, None).unwrap();
        assert_eq!(stmt.sql, r#"ALTER ROLE "r" WITH LOGIN CONNECTION LIMIT 10"#);
        assert!(alter_statement("r", &[], None).is_none());
    }
}
