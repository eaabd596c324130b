use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Basic (core) configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicConfig {
    /// Directory holding the work queue database and the shard databases.
    /// TOML: `basic.data_dir`. Default: `./data`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level for tracing subscriber initialization (e.g., "error",
    /// "warn", "info", "debug", "trace").
    /// TOML: `basic.loglevel`. Default: `info`.
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            loglevel: default_loglevel(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_loglevel() -> String {
    "info".to_string()
}
