use async_trait::async_trait;
use pgreconcile_schema::{ExtensionSpec, ExtensionState, Observed};
use sqlx::PgConnection;
use tracing::{debug, info};

use super::{Applied, Reconciler, Statement, UpdateOutcome, require_non_empty};
use crate::db::{Director, Feature, quote_ident, quote_literal};
use crate::error::{ReconcileError, Result, ResultExt};
use crate::resource_id::{ResourceId, ResourceKind};

pub struct ExtensionReconciler {
    director: Director,
}

impl ExtensionReconciler {
    pub fn new(director: Director) -> Self {
        Self { director }
    }

    async fn create_inner(&self, database: &str, desired: &ExtensionSpec) -> Result<ExtensionState> {
        validate(desired)?;
        let target = self.director.target(database)?;
        target.require(Feature::Extension).await?;

        let mut scope = target.begin().await?;
        let result: Result<ExtensionState> = async {
            let conn = scope.conn();
            if let Observed::Present(existing) = read_extension(conn, database, &desired.name).await? {
                info!(
                    database,
                    extension = %desired.name,
                    version = %existing.version,
                    schema = %existing.schema,
                    "extension already installed; adopting"
                );
                let Some(schema) = adoption(&existing, desired)? else {
                    return Ok(existing);
                };
                set_schema_statement(&desired.name, schema).execute(conn).await?;
                return read_back(conn, database, &desired.name).await;
            }
            create_statement(desired).execute(conn).await?;
            read_back(conn, database, &desired.name).await
        }
        .await;
        scope.finish(result).await
    }

    async fn read_inner(&self, database: &str, name: &str) -> Result<Observed<ExtensionState>> {
        let target = self.director.target(database)?;
        if !target.supports(Feature::Extension).await? {
            debug!(database, "server predates extensions; reporting absent");
            return Ok(Observed::Absent);
        }

        let mut scope = target.begin().await?;
        let result = read_extension(scope.conn(), database, name).await;
        scope.finish(result).await
    }

    async fn update_inner(
        &self,
        id: &ResourceId,
        desired: &ExtensionSpec,
    ) -> Result<UpdateOutcome<ExtensionState>> {
        validate(desired)?;
        let (database, name) = (id.segment(0), id.segment(1));
        let desired_database = self.director.resolve_database(desired.database.as_deref());
        if desired.name != name {
            return Ok(UpdateOutcome::replace(format!(
                "extension name changed from {name:?} to {:?}",
                desired.name
            )));
        }
        if desired_database != database {
            return Ok(UpdateOutcome::replace(format!(
                "database changed from {database:?} to {desired_database:?}"
            )));
        }

        let target = self.director.target(database)?;
        target.require(Feature::Extension).await?;

        let mut scope = target.begin().await?;
        let result: Result<UpdateOutcome<ExtensionState>> = async {
            let conn = scope.conn();
            let current = match read_extension(conn, database, name).await? {
                Observed::Present(state) => state,
                Observed::Absent => {
                    return Ok(UpdateOutcome::replace("extension is no longer installed"));
                }
            };

            match plan_update(&current, desired) {
                UpdatePlan::Replace(reason) => Ok(UpdateOutcome::replace(reason)),
                UpdatePlan::Unchanged => Ok(UpdateOutcome::Updated(Applied::new(current))),
                UpdatePlan::SetSchema(schema) => {
                    set_schema_statement(name, schema).execute(conn).await?;
                    let state = read_back(conn, database, name).await?;
                    Ok(UpdateOutcome::Updated(Applied::new(state)))
                }
            }
        }
        .await;
        scope.finish(result).await
    }

    async fn delete_inner(&self, database: &str, name: &str) -> Result<()> {
        let target = self.director.target(database)?;
        if !target.supports(Feature::Extension).await? {
            return Ok(());
        }

        let mut scope = target.begin().await?;
        let result = Statement::new(
            format!("DROP EXTENSION IF EXISTS {}", quote_ident(name)),
            format!("drop extension {name}"),
        )
        .execute(scope.conn())
        .await;
        scope.finish(result).await
    }
}

#[async_trait]
impl Reconciler for ExtensionReconciler {
    type Desired = ExtensionSpec;
    type State = ExtensionState;

    const KIND: ResourceKind = ResourceKind::Extension;

    fn desired_id(&self, desired: &ExtensionSpec) -> ResourceId {
        let database = self.director.resolve_database(desired.database.as_deref());
        ResourceId::extension(database, &desired.name)
    }

    fn state_id(&self, state: &ExtensionState) -> ResourceId {
        ResourceId::extension(&state.database, &state.name)
    }

    async fn create(&self, desired: &ExtensionSpec) -> Result<Applied<ExtensionState>> {
        let id = self.desired_id(desired);
        let database = self.director.resolve_database(desired.database.as_deref());
        self.create_inner(database, desired)
            .await
            .map(Applied::new)
            .for_resource(&id)
    }

    async fn read(&self, id: &ResourceId) -> Result<Observed<ExtensionState>> {
        expect_kind(id)?;
        self.read_inner(id.segment(0), id.segment(1))
            .await
            .for_resource(id)
    }

    async fn update(
        &self,
        id: &ResourceId,
        desired: &ExtensionSpec,
    ) -> Result<UpdateOutcome<ExtensionState>> {
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
    if id.kind() == ResourceKind::Extension {
        Ok(())
    } else {
        Err(ReconcileError::InvalidResourceId {
            id: id.encode(),
            reason: format!("expected an extension id, got a {} id", id.kind()),
        })
    }
}

fn validate(desired: &ExtensionSpec) -> Result<()> {
    require_non_empty("extension name", &desired.name)?;
    if let Some(schema) = &desired.schema {
        require_non_empty("extension schema", schema)?;
    }
    if let Some(version) = &desired.version {
        require_non_empty("extension version", version)?;
    }
    Ok(())
}

fn create_statement(desired: &ExtensionSpec) -> Statement {
    let mut sql = format!("CREATE EXTENSION {}", quote_ident(&desired.name));
    if let Some(schema) = &desired.schema {
        sql.push_str(" SCHEMA ");
        sql.push_str(&quote_ident(schema));
    }
    if let Some(version) = &desired.version {
        sql.push_str(" VERSION ");
        sql.push_str(&quote_literal(version));
    }
    Statement::new(sql, format!("create extension {}", desired.name))
}

#[derive(Debug, PartialEq, Eq)]
enum UpdatePlan<'a> {
    Unchanged,
    SetSchema(&'a str),
    Replace(String),
}

/// Only the schema can move in place. A pinned version that differs from
/// the installed one needs a reinstall.
fn plan_update<'a>(current: &ExtensionState, desired: &'a ExtensionSpec) -> UpdatePlan<'a> {
    if let Some(version) = desired.version.as_deref()
        && version != current.version
    {
        return UpdatePlan::Replace(format!(
            "version changed from {:?} to {version:?}",
            current.version
        ));
    }
    match desired.schema.as_deref() {
        Some(schema) if schema != current.schema => UpdatePlan::SetSchema(schema),
        _ => UpdatePlan::Unchanged,
    }
}

/// An installed extension is adopted only when it can be brought in line
/// without reinstalling: its schema may move, its version may not.
fn adoption<'a>(existing: &ExtensionState, desired: &'a ExtensionSpec) -> Result<Option<&'a str>> {
    match plan_update(existing, desired) {
        UpdatePlan::Unchanged => Ok(None),
        UpdatePlan::SetSchema(schema) => Ok(Some(schema)),
        UpdatePlan::Replace(reason) => Err(ReconcileError::InvalidAttribute {
            field: "version",
            reason: format!("extension {} is already installed; {reason}", existing.name),
        }),
    }
}

fn set_schema_statement(name: &str, schema: &str) -> Statement {
    Statement::new(
        format!(
            "ALTER EXTENSION {} SET SCHEMA {}",
            quote_ident(name),
            quote_ident(schema)
        ),
        format!("move extension {name} to schema {schema}"),
    )
}

async fn read_extension(
    conn: &mut PgConnection,
    database: &str,
    name: &str,
) -> Result<Observed<ExtensionState>> {
    let row: Option<(String, String)> = sqlx::query_as(
        r#"SELECT e.extversion, n.nspname::text
           FROM pg_catalog.pg_extension e
           JOIN pg_catalog.pg_namespace n ON n.oid = e.extnamespace
           WHERE e.extname = $1"#,
    )
    .bind(name)
    .fetch_optional(conn)
    .await
    .map_err(ReconcileError::catalog(format!("pg_extension {name}")))?;

    Ok(row
        .map(|(version, schema)| ExtensionState {
            database: database.to_string(),
            name: name.to_string(),
            schema,
            version,
        })
        .into())
}

async fn read_back(conn: &mut PgConnection, database: &str, name: &str) -> Result<ExtensionState> {
    read_extension(conn, database, name)
        .await?
        .into_present()
        .ok_or_else(|| {
            ReconcileError::catalog(format!("extension {name} missing after write"))(
                sqlx::Error::RowNotFound,
            )
        })
}
