mod common;

use pgreconcile::schema::{Observed, RoleSpec, SchemaSpec};
use pgreconcile::{Reconciler, ResourceId, RoleReconciler, SchemaReconciler, UpdateOutcome};

#[tokio::test]
async fn role_lifecycle() {
    let Some(director) = common::acceptance() else {
        return;
    };
    let roles = RoleReconciler::new(director.clone());
    let name = common::unique("role");
    let renamed = common::unique("role_renamed");

    let mut spec = RoleSpec::new(&name).with_login("correct horse");
    spec.connection_limit = 5;
    let created = roles.create(&spec).await.expect("create role");
    assert!(created.state.attributes.login);
    assert_eq!(created.state.attributes.connection_limit, 5);
    assert!(created.state.attributes.inherit);

    let id = ResourceId::role(&name);
    assert_eq!(
        roles.read(&id).await.expect("read"),
        Observed::Present(created.state.clone())
    );

    let mut changed = RoleSpec::new(&renamed);
    changed.create_database = true;
    let UpdateOutcome::Updated(updated) = roles.update(&id, &changed).await.expect("update") else {
        panic!("role updates happen in place");
    };
    assert_eq!(updated.state.name, renamed);
    assert!(updated.state.attributes.create_database);
    assert!(!updated.state.attributes.login);
    assert_eq!(updated.state.attributes.connection_limit, -1);
    assert_eq!(roles.read(&id).await.expect("read old name"), Observed::Absent);

    let new_id = roles.state_id(&updated.state);
    roles.delete(&new_id).await.expect("delete");
    assert_eq!(roles.read(&new_id).await.expect("read"), Observed::Absent);
    roles.delete(&new_id).await.expect("delete absent");
    director.close().await;
}

#[tokio::test]
async fn schema_lifecycle() {
    let Some(director) = common::acceptance() else {
        return;
    };
    let admin = common::admin(&director);
    let schemas = SchemaReconciler::new(director.clone());
    let owner = common::unique("schema_owner");
    let name = common::unique("schema");
    common::create_role(&admin, &owner).await;

    let created = schemas
        .create(&SchemaSpec::new(&name))
        .await
        .expect("create schema");
    let id = schemas.state_id(&created.state);

    // Adopting an existing schema still converges the owner.
    let adopted = schemas
        .create(&SchemaSpec::new(&name).owned_by(&owner))
        .await
        .expect("adopt schema");
    assert_eq!(adopted.state.owner, owner);
    assert_eq!(schemas.state_id(&adopted.state), id);

    schemas.delete(&id).await.expect("delete");
    assert_eq!(schemas.read(&id).await.expect("read"), Observed::Absent);

    common::drop_role(&admin, &owner).await;
    director.close().await;
}
