//! Privilege diffing.
//!
//! Everything here is pure: the reconcilers read the catalog, hand both sides
//! to [`diff`] or [`diff_keyed`], and turn the result into statements.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::privilege::PrivilegeSet;

/// Statements needed to move an actual privilege set to a desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrivilegeDiff {
    /// `desired − actual`
    pub grant: PrivilegeSet,
    /// `actual − desired`
    pub revoke: PrivilegeSet,
}

impl PrivilegeDiff {
    pub fn is_empty(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }

    /// `actual ∪ grant − revoke`
    pub fn apply_to(&self, actual: &PrivilegeSet) -> PrivilegeSet {
        actual.union(&self.grant).difference(&self.revoke)
    }
}

pub fn diff(desired: &PrivilegeSet, actual: &PrivilegeSet) -> PrivilegeDiff {
    PrivilegeDiff {
        grant: desired.difference(actual),
        revoke: actual.difference(desired),
    }
}

/// How keys present in the actual state but missing from the desired state
/// are treated by [`diff_keyed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffScope {
    /// Leave unmentioned keys alone.
    #[default]
    Merge,
    /// Unmentioned keys are revoked entirely.
    Replace,
}

/// Per-key diff, where a key is typically a (schema, grantee, object type)
/// triple. Keys whose diff is empty are omitted from the result.
pub fn diff_keyed<K>(
    desired: &BTreeMap<K, PrivilegeSet>,
    actual: &BTreeMap<K, PrivilegeSet>,
    scope: DiffScope,
) -> BTreeMap<K, PrivilegeDiff>
where
    K: Ord + Clone,
{
    let empty = PrivilegeSet::new();
    let mut out = BTreeMap::new();

    for (key, wanted) in desired {
        let current = actual.get(key).unwrap_or(&empty);
        let d = diff(wanted, current);
        if !d.is_empty() {
            out.insert(key.clone(), d);
        }
    }

    if scope == DiffScope::Replace {
        for (key, current) in actual {
            if desired.contains_key(key) || current.is_empty() {
                continue;
            }
            out.insert(key.clone(), diff(&empty, current));
        }
    }

    out
}
