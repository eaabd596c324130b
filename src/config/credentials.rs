use serde::{Deserialize, Serialize};

/// One API credential seed. Quota accounting is tracked per credential at
/// runtime; `quota_max` overrides the pool-wide default for this token.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialSeed {
    pub token: String,

    #[serde(default)]
    pub quota_max: Option<i64>,
}

/// Credential pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    /// API credentials. TOML: `[[credentials.tokens]]`. Required for a run.
    #[serde(default)]
    pub tokens: Vec<CredentialSeed>,

    /// Request budget each credential refreshes to when its window resets.
    /// TOML: `credentials.quota_max`. Default: `5000`.
    #[serde(default = "default_quota_max")]
    pub quota_max: i64,

    /// Length of the quota window in seconds.
    /// TOML: `credentials.quota_window_secs`. Default: `3600`.
    #[serde(default = "default_quota_window_secs")]
    pub quota_window_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            quota_max: default_quota_max(),
            quota_window_secs: default_quota_window_secs(),
        }
    }
}

fn default_quota_max() -> i64 {
    5000
}

fn default_quota_window_secs() -> u64 {
    3600
}
