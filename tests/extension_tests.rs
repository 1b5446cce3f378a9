mod common;

use pgreconcile::schema::{ExtensionSpec, Observed, SchemaSpec};
use pgreconcile::{ExtensionReconciler, Reconciler, ResourceId, SchemaReconciler, UpdateOutcome};

#[tokio::test]
async fn extension_create_read_delete() {
    let Some(director) = common::acceptance() else {
        return;
    };
    let database = director.base_database().to_string();
    let extensions = ExtensionReconciler::new(director.clone());
    let id = ResourceId::extension(&database, "pg_trgm");

    // Leftovers from an aborted run.
    extensions.delete(&id).await.expect("pre-clean");

    let created = extensions
        .create(&ExtensionSpec::new("pg_trgm"))
        .await
        .expect("create pg_trgm");
    assert_eq!(created.state.name, "pg_trgm");
    assert_eq!(created.state.database, database);
    assert_eq!(created.state.schema, "public");
    // The shipped version drifts between server releases.
    assert!(!created.state.version.is_empty());
    assert!(created.warnings.is_empty());

    let read = extensions.read(&id).await.expect("read");
    assert_eq!(read, Observed::Present(created.state.clone()));

    // Creating again adopts the installed extension.
    let adopted = extensions
        .create(&ExtensionSpec::new("pg_trgm"))
        .await
        .expect("create is idempotent");
    assert_eq!(adopted.state, created.state);

    let pinned = ExtensionSpec::new("pg_trgm").with_version(created.state.version.clone());
    let outcome = extensions.update(&id, &pinned).await.expect("update");
    assert_eq!(outcome, UpdateOutcome::Updated(pgreconcile::Applied::new(created.state.clone())));

    let bumped = ExtensionSpec::new("pg_trgm").with_version("999.0");
    assert!(
        extensions
            .update(&id, &bumped)
            .await
            .expect("update")
            .requires_replacement()
    );

    extensions.delete(&id).await.expect("delete");
    assert_eq!(extensions.read(&id).await.expect("read"), Observed::Absent);

    // Deleting something absent is not an error.
    extensions.delete(&id).await.expect("delete absent");
    director.close().await;
}

#[tokio::test]
async fn extension_follows_schema_rename() {
    let Some(director) = common::acceptance() else {
        return;
    };
    let database = director.base_database().to_string();
    let schemas = SchemaReconciler::new(director.clone());
    let extensions = ExtensionReconciler::new(director.clone());
    let foo = common::unique("foo");
    let bar = common::unique("bar");

    let ext_id = ResourceId::extension(&database, "hstore");
    extensions.delete(&ext_id).await.expect("pre-clean");

    let schema = schemas
        .create(&SchemaSpec::new(&foo))
        .await
        .expect("create schema");
    let ext = extensions
        .create(&ExtensionSpec::new("hstore").with_schema(&foo))
        .await
        .expect("create extension in schema");
    assert_eq!(ext.state.schema, foo);

    let renamed = schemas
        .update(&schemas.state_id(&schema.state), &SchemaSpec::new(&bar))
        .await
        .expect("rename schema");
    let UpdateOutcome::Updated(renamed) = renamed else {
        panic!("schema rename should not require replacement");
    };
    assert_eq!(renamed.state.name, bar);

    let after = extensions
        .read(&ext_id)
        .await
        .expect("read extension")
        .into_present()
        .expect("extension survives the rename");
    assert_eq!(after.name, "hstore");
    assert_eq!(after.schema, bar);
    assert_eq!(after.version, ext.state.version);

    extensions.delete(&ext_id).await.expect("delete extension");
    schemas
        .delete(&ResourceId::schema(&database, &bar))
        .await
        .expect("delete schema");
    director.close().await;
}

#[tokio::test]
async fn absent_objects_read_as_absent() {
    let Some(director) = common::acceptance() else {
        return;
    };
    let database = director.base_database().to_string();
    let extensions = ExtensionReconciler::new(director.clone());
    let schemas = SchemaReconciler::new(director.clone());

    let missing = ResourceId::extension(&database, &common::unique("no_such_ext"));
    assert_eq!(extensions.read(&missing).await.expect("read"), Observed::Absent);
    extensions.delete(&missing).await.expect("delete absent");

    let missing = ResourceId::schema(&database, &common::unique("no_such_schema"));
    assert_eq!(schemas.read(&missing).await.expect("read"), Observed::Absent);
    director.close().await;
}

#[tokio::test]
async fn extension_moves_between_schemas_in_place() {
    let Some(director) = common::acceptance() else {
        return;
    };
    let database = director.base_database().to_string();
    let schemas = SchemaReconciler::new(director.clone());
    let extensions = ExtensionReconciler::new(director.clone());
    let foo = common::unique("ext_foo");
    let bar = common::unique("ext_bar");

    let id = ResourceId::extension(&database, "citext");
    extensions.delete(&id).await.expect("pre-clean");
    for name in [&foo, &bar] {
        schemas.create(&SchemaSpec::new(name)).await.expect("create schema");
    }

    let created = extensions
        .create(&ExtensionSpec::new("citext").with_schema(&foo))
        .await
        .expect("create in foo");
    assert_eq!(created.state.schema, foo);

    let moved = extensions
        .update(&id, &ExtensionSpec::new("citext").with_schema(&bar))
        .await
        .expect("move to bar");
    let UpdateOutcome::Updated(moved) = moved else {
        panic!("a schema change is done in place");
    };
    assert_eq!(moved.state.schema, bar);
    assert_eq!(moved.state.name, created.state.name);
    assert_eq!(moved.state.version, created.state.version);

    extensions.delete(&id).await.expect("delete extension");
    for name in [&foo, &bar] {
        schemas
            .delete(&ResourceId::schema(&database, name))
            .await
            .expect("delete schema");
    }
    director.close().await;
}

#[tokio::test]
async fn create_adopts_installed_extension_into_desired_schema() {
    let Some(director) = common::acceptance() else {
        return;
    };
    let database = director.base_database().to_string();
    let admin = common::admin(&director);
    let schemas = SchemaReconciler::new(director.clone());
    let extensions = ExtensionReconciler::new(director.clone());
    let target_schema = common::unique("ext_adopt");

    let id = ResourceId::extension(&database, "fuzzystrmatch");
    extensions.delete(&id).await.expect("pre-clean");
    common::exec(&admin, "CREATE EXTENSION fuzzystrmatch SCHEMA public").await;
    schemas
        .create(&SchemaSpec::new(&target_schema))
        .await
        .expect("create schema");

    // A pinned version the server does not have is refused, not adopted.
    let err = extensions
        .create(
            &ExtensionSpec::new("fuzzystrmatch")
                .with_schema(&target_schema)
                .with_version("0.1"),
        )
        .await
        .expect_err("installed version differs");
    assert!(err.to_string().contains("already installed"), "{err}");
    let untouched = extensions.read(&id).await.expect("read").into_present().expect("still installed");
    assert_eq!(untouched.schema, "public");

    let adopted = extensions
        .create(&ExtensionSpec::new("fuzzystrmatch").with_schema(&target_schema))
        .await
        .expect("adopt");
    assert_eq!(adopted.state.schema, target_schema);
    assert_eq!(adopted.state.version, untouched.version);
    assert_eq!(extensions.read(&id).await.expect("read"), Observed::Present(adopted.state));

    extensions.delete(&id).await.expect("delete extension");
    schemas
        .delete(&ResourceId::schema(&database, &target_schema))
        .await
        .expect("delete schema");
    director.close().await;
}
