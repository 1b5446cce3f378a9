use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Owner role; the session user when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Use `CREATE SCHEMA IF NOT EXISTS` (PostgreSQL 9.3+).
    #[serde(default = "default_true")]
    pub if_not_exists: bool,
}

impl SchemaSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: None,
            owner: None,
            if_not_exists: true,
        }
    }

    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaState {
    pub database: String,
    pub name: String,
    pub owner: String,
}

fn default_true() -> bool {
    true
}
