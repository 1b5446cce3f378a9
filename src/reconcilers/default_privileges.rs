//! `ALTER DEFAULT PRIVILEGES` rules.
//!
//! A rule is keyed by (database, schema, owner, grantee, object type). The
//! privilege set for that key is converged by diffing against
//! `pg_default_acl` and emitting at most one `REVOKE` and one `GRANT`.
//! Privileges the grantee holds through other rules (other schemas, other
//! owners, other object types) live under different keys and are never
//! touched.

use async_trait::async_trait;
use pgreconcile_acl::{ObjectType, Privilege, PrivilegeDiff, PrivilegeSet, diff};
use pgreconcile_schema::{DefaultPrivilegesSpec, DefaultPrivilegesState, Observed};
use sqlx::PgConnection;
use tracing::{debug, info};

use super::{Applied, Reconciler, Statement, UpdateOutcome, require_non_empty};
use crate::db::{Director, Feature, FeatureSet, quote_grantee, quote_ident};
use crate::error::{ReconcileError, Result, ResultExt};
use crate::reconcilers::membership::RoleElevation;
use crate::resource_id::{ResourceId, ResourceKind};

/// Identity of one default-privilege rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleKey {
    pub database: String,
    pub schema: Option<String>,
    pub owner: String,
    pub grantee: String,
    pub object_type: ObjectType,
}

impl RuleKey {
    fn from_spec(director: &Director, spec: &DefaultPrivilegesSpec) -> Self {
        Self {
            database: director.resolve_database(spec.database.as_deref()).to_string(),
            schema: spec.schema.clone().filter(|s| !s.is_empty()),
            owner: spec.owner.clone(),
            grantee: spec.role.clone(),
            object_type: spec.object_type,
        }
    }

    fn from_id(id: &ResourceId) -> Result<Self> {
        let object_type = id
            .segment(4)
            .parse::<ObjectType>()
            .map_err(|e| ReconcileError::InvalidResourceId {
                id: id.encode(),
                reason: e.to_string(),
            })?;
        let schema = Some(id.segment(1))
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Self {
            database: id.segment(0).to_string(),
            schema,
            owner: id.segment(2).to_string(),
            grantee: id.segment(3).to_string(),
            object_type,
        })
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::default_privileges(
            &self.database,
            self.schema.as_deref(),
            &self.owner,
            &self.grantee,
            self.object_type.as_str(),
        )
    }

    fn state(&self, privileges: PrivilegeSet) -> DefaultPrivilegesState {
        DefaultPrivilegesState {
            database: self.database.clone(),
            owner: self.owner.clone(),
            role: self.grantee.clone(),
            schema: self.schema.clone(),
            object_type: self.object_type,
            privileges,
        }
    }

    fn describe(&self) -> String {
        let scope = match &self.schema {
            Some(schema) => format!("in schema {schema}"),
            None => format!("in database {}", self.database),
        };
        format!(
            "future {} owned by {} {scope}",
            self.object_type.sql_plural().to_lowercase(),
            self.owner
        )
    }

    fn validate(&self) -> Result<()> {
        require_non_empty("owner", &self.owner)?;
        require_non_empty("role", &self.grantee)?;
        if self.object_type == ObjectType::Schema && self.schema.is_some() {
            return Err(ReconcileError::InvalidAttribute {
                field: "schema",
                reason: "default privileges on schemas cannot be limited to a schema".to_string(),
            });
        }
        Ok(())
    }

    fn features(&self) -> &'static [Feature] {
        match self.object_type {
            ObjectType::Schema => &[Feature::Privileges, Feature::DefaultPrivilegesOnSchemas],
            _ => &[Feature::Privileges],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Grant,
    Revoke,
}

/// `ALTER DEFAULT PRIVILEGES FOR ROLE .. [IN SCHEMA ..] GRANT|REVOKE ..`.
fn alter_statement(key: &RuleKey, action: Action, privileges: &PrivilegeSet) -> Statement {
    let mut sql = format!("ALTER DEFAULT PRIVILEGES FOR ROLE {}", quote_ident(&key.owner));
    if let Some(schema) = &key.schema {
        sql.push_str(" IN SCHEMA ");
        sql.push_str(&quote_ident(schema));
    }
    let list = privileges.to_sql_list();
    let plural = key.object_type.sql_plural();
    let grantee = quote_grantee(&key.grantee);
    let intent = match action {
        Action::Grant => {
            sql.push_str(&format!(" GRANT {list} ON {plural} TO {grantee}"));
            format!("grant {list} on {} to {}", key.describe(), key.grantee)
        }
        Action::Revoke => {
            sql.push_str(&format!(" REVOKE {list} ON {plural} FROM {grantee}"));
            format!("revoke {list} on {} from {}", key.describe(), key.grantee)
        }
    };
    Statement::new(sql, intent)
}

/// Revoke first, then grant. Empty halves are skipped.
fn diff_statements(key: &RuleKey, diff: &PrivilegeDiff) -> Vec<Statement> {
    let mut out = Vec::with_capacity(2);
    if !diff.revoke.is_empty() {
        out.push(alter_statement(key, Action::Revoke, &diff.revoke));
    }
    if !diff.grant.is_empty() {
        out.push(alter_statement(key, Action::Grant, &diff.grant));
    }
    out
}

/// Rules scoped to one schema are additive: no `pg_default_acl` row means no
/// privileges.
const READ_SCHEMA_RULE: &str = r#"SELECT acl.privilege_type
   FROM pg_catalog.pg_default_acl d
   JOIN pg_catalog.pg_namespace n ON n.oid = d.defaclnamespace
   CROSS JOIN LATERAL pg_catalog.aclexplode(d.defaclacl) AS acl
   WHERE d.defaclrole = (SELECT oid FROM pg_catalog.pg_roles WHERE rolname = $1)
     AND n.nspname = $2
     AND d.defaclobjtype = $3::text::"char"
     AND acl.grantee = CASE
             WHEN lower($4::text) = 'public' THEN 0::oid
             ELSE (SELECT oid FROM pg_catalog.pg_roles WHERE rolname = $4::text)
         END"#;

/// Database-wide rules replace the built-in defaults, so a missing row means
/// `acldefault()` is in effect (PUBLIC may execute functions and use types).
/// Granting back exactly the built-in ACL removes the row again.
const READ_DATABASE_RULE: &str = r#"SELECT acl.privilege_type
   FROM pg_catalog.pg_roles o
   LEFT JOIN pg_catalog.pg_default_acl d
          ON d.defaclrole = o.oid
         AND d.defaclnamespace = 0
         AND d.defaclobjtype = $2::text::"char"
   CROSS JOIN LATERAL pg_catalog.aclexplode(
       COALESCE(d.defaclacl, pg_catalog.acldefault($3::text::"char", o.oid))
   ) AS acl
   WHERE o.rolname = $1
     AND acl.grantee = CASE
             WHEN lower($4::text) = 'public' THEN 0::oid
             ELSE (SELECT oid FROM pg_catalog.pg_roles WHERE rolname = $4::text)
         END"#;

async fn read_rule(conn: &mut PgConnection, key: &RuleKey) -> Result<PrivilegeSet> {
    let query = match &key.schema {
        Some(schema) => sqlx::query_scalar(READ_SCHEMA_RULE)
            .bind(&key.owner)
            .bind(schema)
            .bind(key.object_type.catalog_code().to_string()),
        None => sqlx::query_scalar(READ_DATABASE_RULE)
            .bind(&key.owner)
            .bind(key.object_type.catalog_code().to_string())
            .bind(key.object_type.acldefault_code().to_string()),
    };
    let rows: Vec<String> = query
        .bind(&key.grantee)
        .fetch_all(&mut *conn)
        .await
        .map_err(ReconcileError::catalog(format!("pg_default_acl for {}", key.describe())))?;

    rows.iter()
        .map(|p| {
            p.parse::<Privilege>()
                .map_err(|e| ReconcileError::malformed("pg_default_acl privilege", e))
        })
        .collect()
}

/// Reads, diffs and applies inside the caller's transaction. Membership in
/// the owner role is only taken when there is something to change.
async fn converge_rule(
    conn: &mut PgConnection,
    key: &RuleKey,
    desired: &PrivilegeSet,
    features: &FeatureSet,
) -> Result<Applied<DefaultPrivilegesState>> {
    let actual = read_rule(conn, key).await?;
    let diff = diff(desired, &actual);
    if diff.is_empty() {
        debug!(rule = %key.id(), "default privileges already converged");
        return Ok(Applied::new(key.state(actual)));
    }

    let elevation = RoleElevation::acquire(conn, &key.owner, features).await?;
    let outcome = apply_diff(conn, key, &diff, &elevation).await;
    let warnings = elevation.release(conn, outcome.is_err()).await;
    outcome?;

    let converged = read_rule(conn, key).await?;
    info!(
        rule = %key.id(),
        granted = %diff.grant,
        revoked = %diff.revoke,
        "default privileges converged"
    );
    Ok(Applied::with_warnings(key.state(converged), warnings))
}

async fn apply_diff(
    conn: &mut PgConnection,
    key: &RuleKey,
    diff: &PrivilegeDiff,
    elevation: &RoleElevation,
) -> Result<()> {
    for statement in diff_statements(key, diff) {
        statement
            .execute_with(conn, |intent, source| elevation.classify(intent, source))
            .await?;
    }
    Ok(())
}

pub struct DefaultPrivilegesReconciler {
    director: Director,
}

impl DefaultPrivilegesReconciler {
    pub fn new(director: Director) -> Self {
        Self { director }
    }

    async fn apply(
        &self,
        key: &RuleKey,
        desired: &DefaultPrivilegesSpec,
    ) -> Result<Applied<DefaultPrivilegesState>> {
        key.validate()?;
        let privileges = desired
            .resolve_privileges()
            .map_err(|e| ReconcileError::InvalidAttribute {
                field: "privileges",
                reason: e.to_string(),
            })?;

        let target = self.director.target(&key.database)?;
        let features = target.features().await?;
        for feature in key.features() {
            features.require(*feature)?;
        }

        let mut scope = target.begin().await?;
        let result = converge_rule(scope.conn(), key, &privileges, &features).await;
        scope.finish(result).await
    }

    async fn read_inner(&self, key: &RuleKey) -> Result<Observed<DefaultPrivilegesState>> {
        let target = self.director.target(&key.database)?;
        let features = target.features().await?;
        if key.features().iter().any(|f| !features.supports(*f)) {
            debug!(rule = %key.id(), "server predates this rule type; reporting absent");
            return Ok(Observed::Absent);
        }

        let mut scope = target.begin().await?;
        let result = read_rule(scope.conn(), key).await;
        let privileges = scope.finish(result).await?;
        if privileges.is_empty() {
            Ok(Observed::Absent)
        } else {
            Ok(Observed::Present(key.state(privileges)))
        }
    }

    async fn delete_inner(&self, key: &RuleKey) -> Result<Applied<()>> {
        let target = self.director.target(&key.database)?;
        let features = target.features().await?;
        if key.features().iter().any(|f| !features.supports(*f)) {
            return Ok(Applied::new(()));
        }

        let mut scope = target.begin().await?;
        let result = converge_rule(scope.conn(), key, &PrivilegeSet::new(), &features).await;
        scope
            .finish(result)
            .await
            .map(|applied| Applied::with_warnings((), applied.warnings))
    }
}

#[async_trait]
impl Reconciler for DefaultPrivilegesReconciler {
    type Desired = DefaultPrivilegesSpec;
    type State = DefaultPrivilegesState;

    const KIND: ResourceKind = ResourceKind::DefaultPrivileges;

    fn desired_id(&self, desired: &DefaultPrivilegesSpec) -> ResourceId {
        RuleKey::from_spec(&self.director, desired).id()
    }

    fn state_id(&self, state: &DefaultPrivilegesState) -> ResourceId {
        ResourceId::default_privileges(
            &state.database,
            state.schema.as_deref(),
            &state.owner,
            &state.role,
            state.object_type.as_str(),
        )
    }

    async fn create(&self, desired: &DefaultPrivilegesSpec) -> Result<Applied<DefaultPrivilegesState>> {
        let key = RuleKey::from_spec(&self.director, desired);
        self.apply(&key, desired).await.for_resource(&key.id())
    }

    async fn read(&self, id: &ResourceId) -> Result<Observed<DefaultPrivilegesState>> {
        let key = key_from_id(id)?;
        self.read_inner(&key).await.for_resource(id)
    }

    async fn update(
        &self,
        id: &ResourceId,
        desired: &DefaultPrivilegesSpec,
    ) -> Result<UpdateOutcome<DefaultPrivilegesState>> {
        let current = key_from_id(id)?;
        let wanted = RuleKey::from_spec(&self.director, desired);
        if current != wanted {
            return Ok(UpdateOutcome::replace(format!(
                "rule key changed from {} to {}",
                current.id(),
                wanted.id()
            )));
        }
        self.apply(&wanted, desired)
            .await
            .map(UpdateOutcome::Updated)
            .for_resource(id)
    }

    async fn delete(&self, id: &ResourceId) -> Result<Applied<()>> {
        let key = key_from_id(id)?;
        self.delete_inner(&key).await.for_resource(id)
    }
}

fn key_from_id(id: &ResourceId) -> Result<RuleKey> {
    if id.kind() != ResourceKind::DefaultPrivileges {
        return Err(ReconcileError::InvalidResourceId {
            id: id.encode(),
            reason: format!("expected a default_privileges id, got a {} id", id.kind()),
        });
    }
    RuleKey::from_id(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(schema: Option<&str>, object_type: ObjectType) -> RuleKey {
        RuleKey {
            database: "app".into(),
            schema: schema.map(Into::into),
            owner: "test_owner".into(),
            grantee: "test_role".into(),
            object_type,
        }
    }

    #[test]
    fn grant_in_schema() {
        let stmt = alter_statement(
            &key(Some("test_schema"), ObjectType::Table),
            Action::Grant,
            &PrivilegeSet::from([Privilege::Select]),
        );
        assert_eq!(
            stmt.sql,
            r#"ALTER DEFAULT PRIVILEGES FOR ROLE "test_owner" IN SCHEMA "test_schema" GRANT SELECT ON TABLES TO "test_role""#
        );
        assert!(stmt.intent.contains("future tables owned by test_owner in schema test_schema"));
    }

    #[test]
    fn database_wide_revoke_from_public() {
        let mut k = key(None, ObjectType::Function);
        k.grantee = "public".into();
        let stmt = alter_statement(&k, Action::Revoke, &PrivilegeSet::from([Privilege::Execute]));
        assert_eq!(
            stmt.sql,
            r#"ALTER DEFAULT PRIVILEGES FOR ROLE "test_owner" REVOKE EXECUTE ON FUNCTIONS FROM PUBLIC"#
        );
    }

    #[test]
    fn revoke_precedes_grant_and_noops_emit_nothing() {
        let k = key(Some("s"), ObjectType::Table);
        let desired = PrivilegeSet::from([Privilege::Select, Privilege::Update]);
        let actual = PrivilegeSet::from([Privilege::Select, Privilege::Insert]);

        let stmts = diff_statements(&k, &diff(&desired, &actual));
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].sql.contains("REVOKE INSERT ON TABLES"));
        assert!(stmts[1].sql.contains("GRANT UPDATE ON TABLES"));

        assert!(diff_statements(&k, &diff(&desired, &desired)).is_empty());
    }

    #[test]
    fn schema_rules_cannot_name_a_schema() {
        assert!(key(Some("s"), ObjectType::Schema).validate().is_err());
        assert!(key(None, ObjectType::Schema).validate().is_ok());
        assert_eq!(
            key(None, ObjectType::Schema).features(),
            &[Feature::Privileges, Feature::DefaultPrivilegesOnSchemas]
        );
    }

    #[test]
    fn only_database_wide_rules_fall_back_to_builtin_acl() {
        assert!(READ_DATABASE_RULE.contains("acldefault($3::text::\"char\", o.oid)"));
        assert!(READ_DATABASE_RULE.contains("defaclnamespace = 0"));
        assert!(!READ_SCHEMA_RULE.contains("acldefault"));
    }

    #[test]
    fn key_round_trips_through_id() {
        for k in [key(Some("s.x"), ObjectType::Sequence), key(None, ObjectType::Type)] {
            assert_eq!(RuleKey::from_id(&k.id()).unwrap(), k);
        }
    }

    #[test]
    fn unknown_object_type_in_id_is_rejected() {
        let id = ResourceId::default_privileges("app", None, "o", "r", "view");
        assert!(matches!(
            key_from_id(&id),
            Err(ReconcileError::InvalidResourceId { .. })
        ));
    }
}
