#![allow(dead_code)]

use pgreconcile::config::Config;
use pgreconcile::{ConnectionDescriptor, Director, FeatureSet};
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Director for the acceptance server, or `None` when `PGRECONCILE_ACC` is
/// unset. Connection settings come from the standard `PG*` variables.
pub fn acceptance() -> Option<Director> {
    if std::env::var_os("PGRECONCILE_ACC").is_none() {
        eprintln!("skipping: PGRECONCILE_ACC is not set");
        return None;
    }
    let cfg = Config::load_from("tests/no-such-config.toml")
        .expect("acceptance configuration from PG* variables");
    Some(Director::new(cfg.connection))
}

/// A second director on the same server that logs in as `username`.
pub fn acting_as(director: &Director, username: &str, password: &str) -> Director {
    Director::new(ConnectionDescriptor {
        username: username.to_string(),
        password: Some(password.to_string()),
        ..director.base().clone()
    })
}

pub async fn features(director: &Director) -> FeatureSet {
    director
        .target(director.base_database())
        .expect("base database target")
        .features()
        .await
        .expect("server features")
}

/// Unique, lowercase object name so concurrent test binaries never collide.
pub fn unique(prefix: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .subsec_nanos();
    format!(
        "{prefix}_{}_{}_{nanos}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

pub fn quote(ident: &str) -> String {
    pgreconcile::db::quote_ident(ident)
}

/// Pool on the base database for fixture setup and assertions.
pub fn admin(director: &Director) -> PgPool {
    director
        .target(director.base_database())
        .expect("base database target")
        .pool()
        .clone()
}

pub async fn exec(pool: &PgPool, sql: &str) {
    sqlx::raw_sql(sql)
        .execute(pool)
        .await
        .unwrap_or_else(|e| panic!("fixture statement failed: {sql}: {e}"));
}

pub async fn create_role(pool: &PgPool, name: &str) {
    exec(pool, &format!("CREATE ROLE {}", quote(name))).await;
}

/// Drops a role together with anything it owns or was granted in the base
/// database. Errors are ignored; this runs in cleanup.
pub async fn drop_role(pool: &PgPool, name: &str) {
    let role = quote(name);
    let _ = sqlx::raw_sql(&format!("DROP OWNED BY {role}")).execute(pool).await;
    let _ = sqlx::raw_sql(&format!("DROP ROLE IF EXISTS {role}")).execute(pool).await;
}

pub async fn drop_schema(pool: &PgPool, name: &str) {
    let _ = sqlx::raw_sql(&format!("DROP SCHEMA IF EXISTS {} CASCADE", quote(name)))
        .execute(pool)
        .await;
}

pub async fn create_database(pool: &PgPool, name: &str) {
    exec(pool, &format!("CREATE DATABASE {}", quote(name))).await;
}

pub async fn drop_database(pool: &PgPool, name: &str) {
    exec(pool, &format!("DROP DATABASE IF EXISTS {}", quote(name))).await;
}
