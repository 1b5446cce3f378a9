//! Drives a whole [`Manifest`] through the reconcilers.
//!
//! Kinds are processed in dependency order (roles, schemas, extensions,
//! default privileges) and destroyed in reverse. Resources of one kind run
//! concurrently; a failure in one kind stops every later kind, since those
//! usually depend on it.

use futures::{StreamExt, stream};
use pgreconcile_schema::Observed;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Manifest;
use crate::db::Director;
use crate::error::{CleanupWarning, Result};
use crate::reconcilers::{
    Applied, DefaultPrivilegesReconciler, ExtensionReconciler, Reconciler, RoleReconciler,
    SchemaReconciler, UpdateOutcome,
};
use crate::resource_id::{ResourceId, ResourceKind};
use crate::utils::logging::with_pretty_json_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Updated,
    /// Deleted and recreated because the change could not be made in place.
    Replaced,
    Deleted,
    AlreadyAbsent,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub kind: ResourceKind,
    pub id: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CleanupWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub kind: ResourceKind,
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub entries: Vec<ReportEntry>,
    pub failures: Vec<Failure>,
    /// Kinds not attempted because an earlier kind failed.
    pub skipped: Vec<ResourceKind>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    pub fn count(&self, action: Action) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CleanupWarning> {
        self.entries.iter().flat_map(|e| e.warnings.iter())
    }
}

pub struct Converger {
    roles: RoleReconciler,
    schemas: SchemaReconciler,
    extensions: ExtensionReconciler,
    default_privileges: DefaultPrivilegesReconciler,
    max_concurrency: usize,
}

impl Converger {
    pub fn new(director: &Director, max_concurrency: usize) -> Self {
        Self {
            roles: RoleReconciler::new(director.clone()),
            schemas: SchemaReconciler::new(director.clone()),
            extensions: ExtensionReconciler::new(director.clone()),
            default_privileges: DefaultPrivilegesReconciler::new(director.clone()),
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn apply(&self, manifest: &Manifest) -> Report {
        let mut report = Report::default();
        let limit = self.max_concurrency;

        let mut ok = run_kind(&mut report, &manifest.roles, limit, move |d| apply_one(&self.roles, d)).await;
        ok = ok && run_kind(&mut report, &manifest.schemas, limit, move |d| apply_one(&self.schemas, d)).await;
        ok = ok
            && run_kind(&mut report, &manifest.extensions, limit, move |d| apply_one(&self.extensions, d))
                .await;
        if ok {
            run_kind(&mut report, &manifest.default_privileges, limit, move |d| {
                apply_one(&self.default_privileges, d)
            })
            .await;
        }

        mark_skipped(&mut report, manifest, &APPLY_ORDER);
        finish("apply", report)
    }

    pub async fn destroy(&self, manifest: &Manifest) -> Report {
        let mut report = Report::default();
        let limit = self.max_concurrency;

        let mut ok = run_kind(&mut report, &manifest.default_privileges, limit, move |d| {
            destroy_one(&self.default_privileges, d)
        })
        .await;
        ok = ok
            && run_kind(&mut report, &manifest.extensions, limit, move |d| {
                destroy_one(&self.extensions, d)
            })
            .await;
        ok = ok && run_kind(&mut report, &manifest.schemas, limit, move |d| destroy_one(&self.schemas, d)).await;
        if ok {
            run_kind(&mut report, &manifest.roles, limit, move |d| destroy_one(&self.roles, d)).await;
        }

        let mut reversed = APPLY_ORDER;
        reversed.reverse();
        mark_skipped(&mut report, manifest, &reversed);
        finish("destroy", report)
    }
}

const APPLY_ORDER: [ResourceKind; 4] = [
    ResourceKind::Role,
    ResourceKind::Schema,
    ResourceKind::Extension,
    ResourceKind::DefaultPrivileges,
];

type Outcome = (ResourceId, Result<ReportEntry>);

/// Runs `op` over `items` with at most `limit` in flight. Returns false when
/// any of them failed.
async fn run_kind<'a, T, F, Fut>(report: &mut Report, items: &'a [T], limit: usize, op: F) -> bool
where
    F: Fn(&'a T) -> Fut,
    Fut: Future<Output = Outcome>,
{
    let outcomes: Vec<Outcome> = stream::iter(items).map(op).buffer_unordered(limit).collect().await;

    let mut ok = true;
    for (id, outcome) in outcomes {
        match outcome {
            Ok(entry) => report.entries.push(entry),
            Err(err) => {
                warn!(resource = %id, kind = %id.kind(), error = %err, "reconciliation failed");
                report.failures.push(Failure {
                    kind: id.kind(),
                    id: id.encode(),
                    error: err.root().to_string(),
                });
                ok = false;
            }
        }
    }
    ok
}

fn mark_skipped(report: &mut Report, manifest: &Manifest, order: &[ResourceKind]) {
    let Some(first_failed) = order
        .iter()
        .position(|kind| report.failures.iter().any(|f| f.kind == *kind))
    else {
        return;
    };
    report.skipped = order[first_failed + 1..]
        .iter()
        .copied()
        .filter(|kind| kind_len(manifest, *kind) > 0)
        .collect();
}

fn kind_len(manifest: &Manifest, kind: ResourceKind) -> usize {
    match kind {
        ResourceKind::Role => manifest.roles.len(),
        ResourceKind::Schema => manifest.schemas.len(),
        ResourceKind::Extension => manifest.extensions.len(),
        ResourceKind::DefaultPrivileges => manifest.default_privileges.len(),
    }
}

fn finish(operation: &str, report: Report) -> Report {
    info!(
        operation,
        created = report.count(Action::Created),
        updated = report.count(Action::Updated),
        replaced = report.count(Action::Replaced),
        deleted = report.count(Action::Deleted),
        absent = report.count(Action::AlreadyAbsent),
        failed = report.failures.len(),
        skipped = ?report.skipped,
        "converge finished"
    );
    with_pretty_json_debug(&report, |json| debug!(operation, report = %json));
    report
}

fn entry<R: Reconciler>(
    reconciler: &R,
    action: Action,
    applied: Applied<R::State>,
) -> ReportEntry {
    let id = reconciler.state_id(&applied.state);
    ReportEntry {
        kind: R::KIND,
        id: id.encode(),
        action,
        state: serde_json::to_value(&applied.state).ok(),
        warnings: applied.warnings,
    }
}

/// Read, then create when absent or update when present. An update that
/// cannot be done in place becomes delete + create.
async fn apply_one<R: Reconciler>(reconciler: &R, desired: &R::Desired) -> Outcome {
    let id = reconciler.desired_id(desired);
    let outcome: Result<ReportEntry> = async {
        match reconciler.read(&id).await? {
            Observed::Absent => {
                let applied = reconciler.create(desired).await?;
                Ok(entry(reconciler, Action::Created, applied))
            }
            Observed::Present(_) => match reconciler.update(&id, desired).await? {
                UpdateOutcome::Updated(applied) => Ok(entry(reconciler, Action::Updated, applied)),
                UpdateOutcome::RequiresReplacement { reason } => {
                    info!(resource = %id, %reason, "replacing resource");
                    let deleted = reconciler.delete(&id).await?;
                    let mut applied = reconciler.create(desired).await?;
                    let mut warnings = deleted.warnings;
                    warnings.append(&mut applied.warnings);
                    applied.warnings = warnings;
                    Ok(entry(reconciler, Action::Replaced, applied))
                }
            },
        }
    }
    .await;
    (id, outcome)
}

/// Deletes if present. A database that no longer exists takes its objects
/// with it, so that counts as absent.
async fn destroy_one<R: Reconciler>(reconciler: &R, desired: &R::Desired) -> Outcome {
    let id = reconciler.desired_id(desired);
    let outcome: Result<ReportEntry> = async {
        let observed = match reconciler.read(&id).await {
            Err(err) if err.is_missing_database() => Observed::Absent,
            other => other?,
        };
        let (action, warnings) = match observed {
            Observed::Absent => (Action::AlreadyAbsent, Vec::new()),
            Observed::Present(_) => (Action::Deleted, reconciler.delete(&id).await?.warnings),
        };
        Ok(ReportEntry {
            kind: R::KIND,
            id: id.encode(),
            action,
            state: None,
            warnings,
        })
    }
    .await;
    (id, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;

    fn failure(kind: ResourceKind) -> Failure {
        Failure {
            kind,
            id: "x".into(),
            error: "boom".into(),
        }
    }

    #[test]
    fn later_kinds_with_resources_are_skipped() {
        let mut manifest = Manifest::default();
        manifest.roles.push(pgreconcile_schema::RoleSpec::new("r"));
        manifest
            .extensions
            .push(pgreconcile_schema::ExtensionSpec::new("pg_trgm"));

        let mut report = Report::default();
        report.failures.push(failure(ResourceKind::Role));
        mark_skipped(&mut report, &manifest, &APPLY_ORDER);

        // Schemas and default privileges are empty, so only extensions count.
        assert_eq!(report.skipped, vec![ResourceKind::Extension]);
        assert!(!report.is_success());
    }

    #[test]
    fn report_serializes_without_empty_fields() {
        let report = Report {
            entries: vec![ReportEntry {
                kind: ResourceKind::Extension,
                id: "app.pg_trgm".into(),
                action: Action::AlreadyAbsent,
                state: None,
                warnings: Vec::new(),
            }],
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entries"][0]["action"], "already_absent");
        assert!(json["entries"][0].get("state").is_none());
        assert!(report.is_success());
        assert_eq!(report.count(Action::AlreadyAbsent), 1);
    }

    #[tokio::test]
    async fn failures_are_recorded_per_resource() {
        let items = ["a", "b", "c"];
        let mut report = Report::default();
        let ok = run_kind(&mut report, &items, 2, |name| async move {
            let id = ResourceId::role(name);
            let outcome = if *name == "b" {
                Err(ReconcileError::InvalidAttribute {
                    field: "role name",
                    reason: "rejected".into(),
                })
            } else {
                Ok(ReportEntry {
                    kind: ResourceKind::Role,
                    id: id.encode(),
                    action: Action::Created,
                    state: None,
                    warnings: Vec::new(),
                })
            };
            (id, outcome)
        })
        .await;

        assert!(!ok);
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "b");
        assert_eq!(report.failures[0].error, "invalid role name: rejected");
    }
}
