use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ReconcileError;

/// Server capabilities that change which statements may be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    CreateRoleWith,
    Privileges,
    Extension,
    Replication,
    SchemaCreateIfNotExists,
    RowLevelSecurity,
    DefaultPrivilegesOnSchemas,
    RoleGrantOptions,
}

impl Feature {
    pub fn name(&self) -> &'static str {
        match self {
            Feature::CreateRoleWith => "CREATE ROLE ... WITH",
            Feature::Privileges => "default privileges",
            Feature::Extension => "extensions",
            Feature::Replication => "replication roles",
            Feature::SchemaCreateIfNotExists => "CREATE SCHEMA IF NOT EXISTS",
            Feature::RowLevelSecurity => "row level security",
            Feature::DefaultPrivilegesOnSchemas => "default privileges on schemas",
            Feature::RoleGrantOptions => "role membership SET and INHERIT options",
        }
    }

    /// Bit index inside a [`FeatureSet`].
    fn index(self) -> u32 {
        self as u32
    }

    pub fn min_version(self) -> ServerVersion {
        FEATURE_TABLE
            .iter()
            .find(|(f, _)| *f == self)
            .map(|(_, v)| *v)
            .unwrap_or(ServerVersion::UNKNOWN_FEATURE)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Minimum server version for each capability. Adding a capability means
/// adding a row here and a variant above; reconcilers only ask by name.
pub static FEATURE_TABLE: &[(Feature, ServerVersion)] = &[
    (Feature::CreateRoleWith, ServerVersion::new(8, 1)),
    (Feature::Privileges, ServerVersion::new(9, 0)),
    (Feature::Extension, ServerVersion::new(9, 1)),
    (Feature::Replication, ServerVersion::new(9, 1)),
    (Feature::SchemaCreateIfNotExists, ServerVersion::new(9, 3)),
    (Feature::RowLevelSecurity, ServerVersion::new(9, 5)),
    (Feature::DefaultPrivilegesOnSchemas, ServerVersion::new(10, 0)),
    (Feature::RoleGrantOptions, ServerVersion::new(16, 0)),
];

/// `major.minor` as PostgreSQL numbers its releases: `9.6` before 10,
/// `13.4` (major 13, minor release 4) from 10 on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    const UNKNOWN_FEATURE: ServerVersion = ServerVersion::new(u32::MAX, 0);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Decodes `server_version_num` (`90624`, `130004`).
    pub fn from_version_num(num: u32) -> Self {
        if num >= 100_000 {
            Self::new(num / 10_000, num % 10_000)
        } else {
            Self::new(num / 10_000, (num / 100) % 100)
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized server version {0:?}")]
pub struct ParseVersionError(String);

impl FromStr for ServerVersion {
    type Err = ParseVersionError;

    /// Accepts `server_version` output (`13.4`, `9.6.24`, `16.2 (Debian
    /// 16.2-1.pgdg120+2)`, `17beta1`) as well as a full `version()` string
    /// starting with `PostgreSQL`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("PostgreSQL").unwrap_or(trimmed).trim_start();
        let token = trimmed.split_whitespace().next().ok_or_else(err)?;

        let mut parts = token.split('.');
        let major = leading_number(parts.next().ok_or_else(err)?).ok_or_else(err)?;
        let minor = parts.next().and_then(leading_number).unwrap_or(0);
        Ok(Self::new(major, minor))
    }
}

fn leading_number(s: &str) -> Option<u32> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Bitset of supported [`Feature`]s, computed once per target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    version: ServerVersion,
    bits: u32,
}

impl FeatureSet {
    pub fn for_version(version: ServerVersion) -> Self {
        let bits = FEATURE_TABLE
            .iter()
            .filter(|(_, min)| version >= *min)
            .fold(0u32, |acc, (f, _)| acc | (1 << f.index()));
        Self { version, bits }
    }

    pub fn version(&self) -> ServerVersion {
        self.version
    }

    #[inline]
    pub fn supports(&self, feature: Feature) -> bool {
        (self.bits & (1 << feature.index())) != 0
    }

    /// Fails with `UnsupportedFeature` naming the capability and the server
    /// version when `feature` is missing.
    pub fn require(&self, feature: Feature) -> Result<(), ReconcileError> {
        if self.supports(feature) {
            Ok(())
        } else {
            Err(ReconcileError::UnsupportedFeature {
                feature,
                required: feature.min_version(),
                version: self.version,
            })
        }
    }

    pub fn supported(&self) -> impl Iterator<Item = Feature> + '_ {
        FEATURE_TABLE
            .iter()
            .map(|(f, _)| *f)
            .filter(|f| self.supports(*f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_version_num() {
        assert_eq!(ServerVersion::from_version_num(90_624), ServerVersion::new(9, 6));
        assert_eq!(ServerVersion::from_version_num(90_100), ServerVersion::new(9, 1));
        assert_eq!(ServerVersion::from_version_num(130_004), ServerVersion::new(13, 4));
        assert_eq!(ServerVersion::from_version_num(100_000), ServerVersion::new(10, 0));
    }

    #[test]
    fn parses_version_strings() {
        assert_eq!("9.6.24".parse(), Ok(ServerVersion::new(9, 6)));
        assert_eq!("13.4".parse(), Ok(ServerVersion::new(13, 4)));
        assert_eq!(
            "16.2 (Debian 16.2-1.pgdg120+2)".parse(),
            Ok(ServerVersion::new(16, 2))
        );
        assert_eq!("17beta1".parse(), Ok(ServerVersion::new(17, 0)));
        assert_eq!(
            "PostgreSQL 9.5.25 on x86_64-pc-linux-gnu".parse(),
            Ok(ServerVersion::new(9, 5))
        );
        assert!("banana".parse::<ServerVersion>().is_err());
    }

    #[test]
    fn every_feature_has_a_table_row() {
        for feature in [
            Feature::CreateRoleWith,
            Feature::Privileges,
            Feature::Extension,
            Feature::Replication,
            Feature::SchemaCreateIfNotExists,
            Feature::RowLevelSecurity,
            Feature::DefaultPrivilegesOnSchemas,
            Feature::RoleGrantOptions,
        ] {
            assert_ne!(feature.min_version(), ServerVersion::UNKNOWN_FEATURE);
        }
    }

    #[test]
    fn gates_follow_minimum_versions() {
        let old = FeatureSet::for_version(ServerVersion::new(9, 0));
        assert!(old.supports(Feature::Privileges));
        assert!(!old.supports(Feature::Extension));
        assert!(!old.supports(Feature::DefaultPrivilegesOnSchemas));

        let pg96 = FeatureSet::for_version(ServerVersion::new(9, 6));
        assert!(pg96.supports(Feature::Extension));
        assert!(pg96.supports(Feature::RowLevelSecurity));
        assert!(!pg96.supports(Feature::DefaultPrivilegesOnSchemas));

        let err = pg96.require(Feature::DefaultPrivilegesOnSchemas).unwrap_err();
        assert_eq!(err.unsupported_feature(), Some(Feature::DefaultPrivilegesOnSchemas));
        assert!(err.to_string().contains("9.6"));

        let pg15 = FeatureSet::for_version(ServerVersion::new(15, 4));
        assert!(!pg15.supports(Feature::RoleGrantOptions));

        let pg16 = FeatureSet::for_version(ServerVersion::new(16, 0));
        assert_eq!(pg16.supported().count(), FEATURE_TABLE.len());
    }
}
