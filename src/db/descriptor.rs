use serde::{Deserialize, Serialize};
use sqlx::postgres::PgSslMode;
use url::Url;

use crate::error::ReconcileError;

/// TLS negotiation mode, spelled as libpq's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Allow => PgSslMode::Allow,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

/// Where and how to connect. Two descriptors that differ only in `database`
/// are distinct endpoints: they get separate pools and never share a
/// transaction.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Hostname, IP address, or a unix socket directory (starting with `/`).
    /// TOML: `connection.host`. Default: `localhost`.
    #[serde(default = "default_host")]
    pub host: String,

    /// TOML: `connection.port`. Default: `5432`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// TOML: `connection.username`. Default: `postgres`.
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// TOML: `connection.sslmode`. Default: `prefer`.
    #[serde(default)]
    pub sslmode: SslMode,

    /// Base database, used for cluster-wide objects and for resources that
    /// do not name a database. TOML: `connection.database`. Default: `postgres`.
    #[serde(default = "default_database")]
    pub database: String,

    /// TOML: `connection.application_name`. Default: `pgreconcile`.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Pool size per target database. TOML: `connection.max_connections`. Default: `4`.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Upper bound for checking a connection out of the pool, connect included.
    /// TOML: `connection.connect_timeout_secs`. Default: `15`.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionDescriptor {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: None,
            sslmode: SslMode::default(),
            database: default_database(),
            application_name: default_application_name(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ConnectionDescriptor {
    /// Same endpoint, different database. Credentials and TLS are inherited.
    pub fn for_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }

    /// `postgres://` URL with credentials and database percent-encoded.
    pub fn connection_url(&self) -> Result<Url, ReconcileError> {
        let invalid = |reason: String| ReconcileError::InvalidAttribute {
            field: "connection",
            reason,
        };

        let socket_dir = self.host.starts_with('/');
        let authority = if socket_dir {
            "localhost".to_string()
        } else if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        let mut url = Url::parse(&format!("postgres://{authority}:{}", self.port))
            .map_err(|e| invalid(format!("host {:?}: {e}", self.host)))?;
        url.set_username(&self.username)
            .map_err(|()| invalid("username cannot be set".to_string()))?;
        url.set_password(self.password.as_deref())
            .map_err(|()| invalid("password cannot be set".to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("url cannot carry a database".to_string()))?
            .clear()
            .push(&self.database);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("sslmode", self.sslmode.as_str());
            query.append_pair("application_name", &self.application_name);
            if socket_dir {
                query.append_pair("host", &self.host);
            }
        }

        Ok(url)
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("sslmode", &self.sslmode)
            .field("database", &self.database)
            .field("application_name", &self.application_name)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_application_name() -> String {
    "pgreconcile".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_connect_timeout_secs() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "db.internal".into(),
            port: 6543,
            username: "admin@corp".into(),
            password: Some("p@ss:w/rd?#".into()),
            sslmode: SslMode::Require,
            database: "postgres".into(),
            ..Default::default()
        }
    }

    #[test]
    fn credentials_and_database_are_escaped() {
        let url = descriptor()
            .for_database("app/prod")
            .connection_url()
            .unwrap();

        assert_eq!(url.username(), "admin%40corp");
        assert_eq!(url.password(), Some("p%40ss%3Aw%2Frd%3F%23"));
        assert_eq!(url.path(), "/app%2Fprod");
        assert_eq!(url.host_str(), Some("db.internal"));
        assert_eq!(url.port(), Some(6543));
        assert!(url.query().unwrap().contains("sslmode=require"));
    }

    #[test]
    fn for_database_only_changes_the_database() {
        let base = descriptor();
        let target = base.for_database("other");
        assert_ne!(base, target);
        assert_eq!(target.for_database("postgres"), base);
        assert_eq!(target.password, base.password);
        assert_eq!(target.sslmode, base.sslmode);
    }

    #[test]
    fn ipv6_and_socket_hosts() {
        let v6 = ConnectionDescriptor {
            host: "::1".into(),
            ..Default::default()
        };
        assert_eq!(v6.connection_url().unwrap().host_str(), Some("[::1]"));

        let socket = ConnectionDescriptor {
            host: "/var/run/postgresql".into(),
            ..Default::default()
        };
        let url = socket.connection_url().unwrap();
        assert!(
            url.query_pairs()
                .any(|(k, v)| k == "host" && v == "/var/run/postgresql")
        );
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", descriptor());
        assert!(!rendered.contains("p@ss"));
        assert!(rendered.contains("<redacted>"));
    }
}
