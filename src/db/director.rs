//! Database-scoped connection pools.
//!
//! Extensions and default privileges live inside one database, so a
//! statement sent to the wrong database silently does nothing useful. The
//! [`Director`] hands out one [`TargetDatabase`] per (descriptor, database)
//! pair, each with its own pool and its own cached feature set.

use moka::sync::Cache;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::descriptor::ConnectionDescriptor;
use super::features::{Feature, FeatureSet, ServerVersion};
use super::transaction::ScopedTransaction;
use crate::error::{ReconcileError, Result};

/// Hands out pooled connections scoped to a specific database.
///
/// Cloning is cheap; clones share the pool cache. The cache is unbounded:
/// the set of databases is fixed by the manifest, and an evicted pool would
/// leave its connections open until the last handle dropped.
#[derive(Clone)]
pub struct Director {
    base: Arc<ConnectionDescriptor>,
    targets: Cache<ConnectionDescriptor, Arc<TargetDatabase>>,
}

impl Director {
    pub fn new(base: ConnectionDescriptor) -> Self {
        let targets = Cache::builder().build();
        Self {
            base: Arc::new(base),
            targets,
        }
    }

    pub fn base(&self) -> &ConnectionDescriptor {
        &self.base
    }

    pub fn base_database(&self) -> &str {
        &self.base.database
    }

    /// Resolves an optional per-resource database to a concrete name.
    pub fn resolve_database<'a>(&'a self, database: Option<&'a str>) -> &'a str {
        database
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.base.database)
    }

    /// Pool handle for `database`, created on first use. No connection is
    /// opened here; connect errors surface from [`TargetDatabase::begin`].
    pub fn target(&self, database: &str) -> Result<Arc<TargetDatabase>> {
        let descriptor = self.base.for_database(database);
        if let Some(target) = self.targets.get(&descriptor) {
            return Ok(target);
        }

        let url = descriptor.connection_url()?;
        let options =
            PgConnectOptions::from_str(url.as_str()).map_err(|source| {
                ReconcileError::Connection {
                    database: database.to_string(),
                    source,
                }
            })?;

        let key = descriptor.clone();
        Ok(self.targets.get_with(key, || {
            debug!(database, host = %descriptor.host, "creating connection pool");
            Arc::new(TargetDatabase::lazy(&descriptor, options))
        }))
    }

    /// Closes every pool. Checked-out connections finish their work first.
    pub async fn close(&self) {
        let targets: Vec<_> = self.targets.iter().map(|(_, t)| t).collect();
        self.targets.invalidate_all();
        for target in targets {
            target.pool.close().await;
        }
    }
}

pub struct TargetDatabase {
    database: String,
    pool: PgPool,
    features: OnceCell<FeatureSet>,
}

impl TargetDatabase {
    fn lazy(descriptor: &ConnectionDescriptor, options: PgConnectOptions) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(descriptor.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(descriptor.connect_timeout_secs.max(1)))
            .connect_lazy_with(options);

        Self {
            database: descriptor.database.clone(),
            pool,
            features: OnceCell::new(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Checks a connection out and opens a transaction on it.
    pub async fn begin(&self) -> Result<ScopedTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|source| self.connection_error(source))?;
        Ok(ScopedTransaction::new(&self.database, tx))
    }

    /// Server capabilities, detected on first call and cached for the
    /// lifetime of the pool.
    pub async fn features(&self) -> Result<FeatureSet> {
        self.features
            .get_or_try_init(|| self.detect_features())
            .await
            .copied()
    }

    pub async fn supports(&self, feature: Feature) -> Result<bool> {
        Ok(self.features().await?.supports(feature))
    }

    pub async fn require(&self, feature: Feature) -> Result<()> {
        self.features().await?.require(feature)
    }

    async fn detect_features(&self) -> Result<FeatureSet> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|source| self.connection_error(source))?;

        let version_num: String = sqlx::query_scalar("SHOW server_version_num")
            .fetch_one(&mut *conn)
            .await
            .map_err(ReconcileError::catalog("SHOW server_version_num"))?;

        let version = match version_num.trim().parse::<u32>() {
            Ok(num) => ServerVersion::from_version_num(num),
            Err(_) => {
                let raw: String = sqlx::query_scalar("SHOW server_version")
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(ReconcileError::catalog("SHOW server_version"))?;
                raw.parse::<ServerVersion>()
                    .map_err(|e| ReconcileError::malformed("SHOW server_version", e))?
            }
        };

        let features = FeatureSet::for_version(version);
        info!(
            database = %self.database,
            version = %version,
            features = ?features.supported().collect::<Vec<_>>(),
            "detected server features"
        );
        Ok(features)
    }

    fn connection_error(&self, source: sqlx::Error) -> ReconcileError {
        ReconcileError::Connection {
            database: self.database.clone(),
            source,
        }
    }
}
