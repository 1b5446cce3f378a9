mod basic;
mod manifest;

pub use basic::BasicConfig;
pub use manifest::Manifest;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::db::ConnectionDescriptor;
use crate::error::{ReconcileError, Result};

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Process settings (see `basic` table in pgreconcile.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Server to reconcile against (see `connection` table).
    #[serde(default)]
    pub connection: ConnectionDescriptor,

    /// Desired state (see `resources` table).
    #[serde(default)]
    pub resources: Manifest,
}

pub const DEFAULT_CONFIG_FILE: &str = "pgreconcile.toml";

/// Standard libpq variables and where they land in [`Config`].
const LIBPQ_ENV: &[(&str, &str)] = &[
    ("pghost", "connection.host"),
    ("pgport", "connection.port"),
    ("pguser", "connection.username"),
    ("pgpassword", "connection.password"),
    ("pgdatabase", "connection.database"),
    ("pgsslmode", "connection.sslmode"),
    ("pgappname", "connection.application_name"),
];

impl Config {
    /// Defaults, then libpq `PG*` variables, then the TOML file if present,
    /// then `PGRECONCILE_*` variables (`__` separates nesting levels, as in
    /// `PGRECONCILE_CONNECTION__HOST`).
    pub fn figment_from(path: impl AsRef<Path>) -> Figment {
        let path = path.as_ref();
        let libpq = Env::raw().filter_map(|key| {
            LIBPQ_ENV
                .iter()
                .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
                .map(|(_, target)| (*target).into())
        });

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(libpq);
        let figment = if path.is_file() {
            figment.merge(Toml::file(path))
        } else {
            figment
        };
        figment.merge(Env::prefixed("PGRECONCILE_").split("__"))
    }

    pub fn figment() -> Figment {
        Self::figment_from(DEFAULT_CONFIG_FILE)
    }

    /// Loads and validates configuration from the default sources.
    pub fn load() -> Result<Self> {
        Self::extract(Self::figment())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::extract(Self::figment_from(path))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let cfg: Self = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.basic.max_concurrency == 0 {
            return Err(ReconcileError::InvalidAttribute {
                field: "basic.max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.connection.max_connections == 0 {
            return Err(ReconcileError::InvalidAttribute {
                field: "connection.max_connections",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
