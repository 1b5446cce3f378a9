//! Stable composite keys for managed catalog objects.
//!
//! An id is a list of segments joined with `.`; a literal `.` or `\` inside a
//! segment is escaped with `\`, so names containing dots survive a round trip.
//!
//! | kind               | segments                                          |
//! |--------------------|---------------------------------------------------|
//! | extension          | `database.extension`                              |
//! | default privileges | `database.schema.owner.grantee.object_type`       |
//! | schema             | `database.schema`                                 |
//! | role               | `role`                                            |
//!
//! The schema segment of a default-privileges id is empty for database-wide
//! rules.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Extension,
    DefaultPrivileges,
    Schema,
    Role,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Extension => "extension",
            ResourceKind::DefaultPrivileges => "default_privileges",
            ResourceKind::Schema => "schema",
            ResourceKind::Role => "role",
        }
    }

    fn segment_count(&self) -> usize {
        match self {
            ResourceKind::Extension | ResourceKind::Schema => 2,
            ResourceKind::DefaultPrivileges => 5,
            ResourceKind::Role => 1,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    kind: ResourceKind,
    segments: Vec<String>,
}

impl ResourceId {
    pub fn extension(database: &str, name: &str) -> Self {
        Self::from_segments(ResourceKind::Extension, [database, name])
    }

    pub fn default_privileges(
        database: &str,
        schema: Option<&str>,
        owner: &str,
        grantee: &str,
        object_type: &str,
    ) -> Self {
        Self::from_segments(
            ResourceKind::DefaultPrivileges,
            [database, schema.unwrap_or(""), owner, grantee, object_type],
        )
    }

    pub fn schema(database: &str, name: &str) -> Self {
        Self::from_segments(ResourceKind::Schema, [database, name])
    }

    pub fn role(name: &str) -> Self {
        Self::from_segments(ResourceKind::Role, [name])
    }

    fn from_segments<const N: usize>(kind: ResourceKind, segments: [&str; N]) -> Self {
        Self {
            kind,
            segments: segments.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Parses an encoded id for the given kind, e.g. during import.
    pub fn parse(kind: ResourceKind, encoded: &str) -> Result<Self, ReconcileError> {
        let invalid = |reason: String| ReconcileError::InvalidResourceId {
            id: encoded.to_string(),
            reason,
        };

        let segments = split_segments(encoded).map_err(|e| invalid(e.to_string()))?;
        if segments.len() != kind.segment_count() {
            return Err(invalid(format!(
                "{kind} ids have {} segments, found {}",
                kind.segment_count(),
                segments.len()
            )));
        }

        // Only the schema segment of a default-privileges id may be empty.
        let optional = if kind == ResourceKind::DefaultPrivileges {
            Some(1)
        } else {
            None
        };
        if let Some(idx) = segments
            .iter()
            .enumerate()
            .position(|(i, s)| s.is_empty() && Some(i) != optional)
        {
            return Err(invalid(format!("segment {idx} is empty")));
        }

        Ok(Self { kind, segments })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn segment(&self, idx: usize) -> &str {
        self.segments.get(idx).map(String::as_str).unwrap_or("")
    }

    /// Database the object lives in; `None` for cluster-wide roles.
    pub fn database(&self) -> Option<&str> {
        match self.kind {
            ResourceKind::Role => None,
            _ => Some(self.segment(0)),
        }
    }

    pub fn encode(&self) -> String {
        self.segments
            .iter()
            .map(|s| escape_segment(s))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        if c == '.' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn split_segments(encoded: &str) -> Result<Vec<String>, &'static str> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = encoded.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next @ ('.' | '\\')) => current.push(next),
                Some(_) => return Err("invalid escape sequence"),
                None => return Err("dangling escape at end of id"),
            },
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    Ok(segments)
}
