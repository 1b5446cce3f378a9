use async_trait::async_trait;
use pgreconcile_schema::{Observed, SchemaSpec, SchemaState};
use sqlx::PgConnection;
use tracing::info;

use super::{Applied, Reconciler, Statement, UpdateOutcome, require_non_empty};
use crate::db::{Director, Feature, FeatureSet, quote_ident};
use crate::error::{ReconcileError, Result, ResultExt};
use crate::resource_id::{ResourceId, ResourceKind};

pub struct SchemaReconciler {
    director: Director,
}

impl SchemaReconciler {
    pub fn new(director: Director) -> Self {
        Self { director }
    }

    async fn create_inner(&self, database: &str, desired: &SchemaSpec) -> Result<SchemaState> {
        validate(desired)?;
        let target = self.director.target(database)?;
        let features = target.features().await?;

        let mut scope = target.begin().await?;
        let result: Result<SchemaState> = async {
            let conn = scope.conn();
            match read_schema(conn, database, &desired.name).await? {
                Observed::Present(existing) if desired.if_not_exists => {
                    info!(database, schema = %desired.name, "schema already exists; adopting");
                    if let Some(stmt) = owner_statement(&existing, desired) {
                        stmt.execute(conn).await?;
                    }
                }
                _ => create_statement(desired, &features).execute(conn).await?,
            }
            read_back(conn, database, &desired.name).await
        }
        .await;
        scope.finish(result).await
    }

    async fn read_inner(&self, database: &str, name: &str) -> Result<Observed<SchemaState>> {
        let target = self.director.target(database)?;
        let mut scope = target.begin().await?;
        let result = read_schema(scope.conn(), database, name).await;
        scope.finish(result).await
    }

    async fn update_inner(
        &self,
        id: &ResourceId,
        desired: &SchemaSpec,
    ) -> Result<UpdateOutcome<SchemaState>> {
        validate(desired)?;
        let (database, name) = (id.segment(0), id.segment(1));
        let desired_database = self.director.resolve_database(desired.database.as_deref());
        if desired_database != database {
            return Ok(UpdateOutcome::replace(format!(
                "database changed from {database:?} to {desired_database:?}"
            )));
        }

        let target = self.director.target(database)?;
        let mut scope = target.begin().await?;
        let result: Result<UpdateOutcome<SchemaState>> = async {
            let conn = scope.conn();
            let Observed::Present(mut current) = read_schema(conn, database, name).await? else {
                return Ok(UpdateOutcome::replace("schema no longer exists"));
            };

            if current.name != desired.name {
                rename_statement(&current.name, &desired.name)
                    .execute(conn)
                    .await?;
                current.name.clone_from(&desired.name);
            }
            if let Some(stmt) = owner_statement(&current, desired) {
                stmt.execute(conn).await?;
            }

            let state = read_back(conn, database, &desired.name).await?;
            Ok(UpdateOutcome::Updated(Applied::new(state)))
        }
        .await;
        scope.finish(result).await
    }

    async fn delete_inner(&self, database: &str, name: &str) -> Result<()> {
        let target = self.director.target(database)?;
        let mut scope = target.begin().await?;
        let result = Statement::new(
            format!("DROP SCHEMA IF EXISTS {}", quote_ident(name)),
            format!("drop schema {name}"),
        )
        .execute(scope.conn())
        .await;
        scope.finish(result).await
    }
}

#[async_trait]
impl Reconciler for SchemaReconciler {
    type Desired = SchemaSpec;
    type State = SchemaState;

    const KIND: ResourceKind = ResourceKind::Schema;

    fn desired_id(&self, desired: &SchemaSpec) -> ResourceId {
        let database = self.director.resolve_database(desired.database.as_deref());
        ResourceId::schema(database, &desired.name)
    }

    fn state_id(&self, state: &SchemaState) -> ResourceId {
        ResourceId::schema(&state.database, &state.name)
    }

    async fn create(&self, desired: &SchemaSpec) -> Result<Applied<SchemaState>> {
        let id = self.desired_id(desired);
        let database = self.director.resolve_database(desired.database.as_deref());
        self.create_inner(database, desired)
            .await
            .map(Applied::new)
            .for_resource(&id)
    }

    async fn read(&self, id: &ResourceId) -> Result<Observed<SchemaState>> {
        expect_kind(id)?;
        self.read_inner(id.segment(0), id.segment(1))
            .await
            .for_resource(id)
    }

    async fn update(&self, id: &ResourceId, desired: &SchemaSpec) -> Result<UpdateOutcome<SchemaState>> {
        expect_kind(id)?;
        self.update_inner(id, desired).await.for_resource(id)
    }

    async fn delete(&self, id: &ResourceId) -> Result<Applied<()>> {
        expect_kind(id)?;
        self.delete_inner(id.segment(0), id.segment(1))
            .await
            .map(Applied::new)
            .for_resource(id)
    }
}

fn expect_kind(id: &ResourceId) -> Result<()> {
    if id.kind() == ResourceKind::Schema {
        return Ok(());
    }
    Err(ReconcileError::InvalidResourceId {
        id: id.encode(),
        reason: format!("expected a schema id, got a {} id", id.kind()),
    })
}

fn validate(desired: &SchemaSpec) -> Result<()> {
    require_non_empty("schema name", &desired.name)?;
    if let Some(owner) = &desired.owner {
        require_non_empty("schema owner", owner)?;
    }
    Ok(())
}

/// Servers without `IF NOT EXISTS` get a plain `CREATE SCHEMA`; the catalog
/// read that precedes it in the same transaction covers the common case.
fn create_statement(desired: &SchemaSpec, features: &FeatureSet) -> Statement {
    let mut sql = String::from("CREATE SCHEMA ");
    if desired.if_not_exists && features.supports(Feature::SchemaCreateIfNotExists) {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(&quote_ident(&desired.name));
    if let Some(owner) = &desired.owner {
        sql.push_str(" AUTHORIZATION ");
        sql.push_str(&quote_ident(owner));
    }
    Statement::new(sql, format!("create schema {}", desired.name))
}

fn rename_statement(from: &str, to: &str) -> Statement {
    Statement::new(
        format!("ALTER SCHEMA {} RENAME TO {}", quote_ident(from), quote_ident(to)),
        format!("rename schema {from} to {to}"),
    )
}

fn owner_statement(current: &SchemaState, desired: &SchemaSpec) -> Option<Statement> {
    let owner = desired.owner.as_deref().filter(|o| *o != current.owner)?;
    Some(Statement::new(
        format!(
            "ALTER SCHEMA {} OWNER TO {}",
            quote_ident(&current.name),
            quote_ident(owner)
        ),
        format!("change owner of schema {} to {owner}", current.name),
    ))
}

async fn read_schema(
    conn: &mut PgConnection,
    database: &str,
    name: &str,
) -> Result<Observed<SchemaState>> {
    let owner: Option<String> = sqlx::query_scalar(
        r#"SELECT pg_catalog.pg_get_userbyid(n.nspowner)::text
           FROM pg_catalog.pg_namespace n
           WHERE n.nspname = $1"#,
    )
    .bind(name)
    .fetch_optional(conn)
    .await
    .map_err(ReconcileError::catalog(format!("pg_namespace {name}")))?;

    Ok(owner
        .map(|owner| SchemaState {
            database: database.to_string(),
            name: name.to_string(),
            owner,
        })
        .into())
}

async fn read_back(conn: &mut PgConnection, database: &str, name: &str) -> Result<SchemaState> {
    read_schema(conn, database, name)
        .await?
        .into_present()
        .ok_or_else(|| {
            ReconcileError::catalog(format!("schema {name} missing after write"))(
                sqlx::Error::RowNotFound,
            )
        })
}
