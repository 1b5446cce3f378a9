use pgreconcile::schema::ExtensionSpec;
use pgreconcile::{ConnectionDescriptor, Director, ExtensionReconciler, Reconciler, ResourceId};
use std::sync::Arc;

fn unreachable() -> ConnectionDescriptor {
    ConnectionDescriptor {
        host: "127.0.0.1".into(),
        // Nothing listens on the discard port.
        port: 9,
        database: "app".into(),
        connect_timeout_secs: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn targets_are_cached_per_database() {
    let director = Director::new(unreachable());

    let first = director.target("app").expect("target");
    let again = director.target("app").expect("target");
    let other = director.target("analytics").expect("target");

    assert!(Arc::ptr_eq(&first, &again));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(other.database(), "analytics");
    director.close().await;
}

#[tokio::test]
async fn many_databases_keep_their_pools_open() {
    let director = Director::new(unreachable());
    let databases: Vec<String> = (0..200).map(|i| format!("tenant_{i}")).collect();

    let first: Vec<_> = databases
        .iter()
        .map(|db| director.target(db).expect("target"))
        .collect();
    for (db, target) in databases.iter().zip(&first) {
        let again = director.target(db).expect("target");
        assert!(Arc::ptr_eq(target, &again), "pool for {db} was replaced");
        assert!(!target.pool().is_closed());
    }

    director.close().await;
    assert!(first.iter().all(|t| t.pool().is_closed()));
}

#[tokio::test]
async fn unset_database_falls_back_to_the_base() {
    let director = Director::new(unreachable());
    assert_eq!(director.resolve_database(None), "app");
    assert_eq!(director.resolve_database(Some("")), "app");
    assert_eq!(director.resolve_database(Some("other")), "other");

    let extensions = ExtensionReconciler::new(director.clone());
    assert_eq!(
        extensions.desired_id(&ExtensionSpec::new("pg_trgm")),
        ResourceId::extension("app", "pg_trgm")
    );
    director.close().await;
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error_with_context() {
    let director = Director::new(unreachable());
    let extensions = ExtensionReconciler::new(director.clone());
    let id = ResourceId::extension("app", "pg_trgm");

    let err = extensions.read(&id).await.expect_err("nothing is listening");
    assert!(err.is_connection());
    assert!(!err.is_unsupported());
    assert!(err.to_string().starts_with("extension app.pg_trgm: "));
    director.close().await;
}

#[tokio::test]
async fn wrong_kind_of_id_is_rejected() {
    let director = Director::new(unreachable());
    let extensions = ExtensionReconciler::new(director.clone());
    let err = extensions
        .read(&ResourceId::role("app_owner"))
        .await
        .expect_err("role id");
    assert!(matches!(err, pgreconcile::ReconcileError::InvalidResourceId { .. }));
    director.close().await;
}
