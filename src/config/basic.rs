use serde::{Deserialize, Serialize};

/// Process-level settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicConfig {
    /// Log level for tracing subscriber initialization (e.g., "error", "warn", "info", "debug", "trace").
    /// Overridden by `RUST_LOG`. TOML: `basic.loglevel`. Default: `info`.
    #[serde(default = "default_loglevel")]
    pub loglevel: String,

    /// Resources of one kind reconciled at the same time.
    /// TOML: `basic.max_concurrency`. Default: `4`.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            loglevel: default_loglevel(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_loglevel() -> String {
    "info".to_string()
}

fn default_max_concurrency() -> usize {
    4
}
