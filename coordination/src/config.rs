//! Runtime configuration read from `PIPELINE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::state::redaction::{DEFAULT_MARKER, DEFAULT_MAX_DEPTH};
use crate::state::{RetryPolicy, StoreConfig};

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Directory of `<version>.{yaml,yml,toml,json}` definitions
    pub definitions_dir: PathBuf,

    /// Driver-level wait on a locked database
    pub busy_timeout_ms: u64,

    /// Deadline applied when the caller supplies none
    pub op_timeout_ms: u64,

    pub max_retries: u32,

    /// First backoff step; doubles per attempt
    pub retry_backoff_ms: u64,

    pub max_payload_bytes: usize,

    pub redaction_marker: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".pipeline/coordination.db"),
            definitions_dir: PathBuf::from("pipeline-definitions"),
            busy_timeout_ms: 250,
            op_timeout_ms: 5000,
            max_retries: 5,
            retry_backoff_ms: 20,
            max_payload_bytes: 1024 * 1024,
            redaction_marker: DEFAULT_MARKER.to_string(),
        }
    }
}

impl CoordinationConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable numeric values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("PIPELINE_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("PIPELINE_DEFINITIONS_DIR") {
            config.definitions_dir = PathBuf::from(dir);
        }
        if let Some(n) = lookup("PIPELINE_BUSY_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            config.busy_timeout_ms = n;
        }
        if let Some(n) = lookup("PIPELINE_OP_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            config.op_timeout_ms = n;
        }
        if let Some(n) = lookup("PIPELINE_MAX_RETRIES").and_then(|s| s.parse().ok()) {
            config.max_retries = n;
        }
        if let Some(n) = lookup("PIPELINE_RETRY_BACKOFF_MS").and_then(|s| s.parse().ok()) {
            config.retry_backoff_ms = n;
        }
        if let Some(n) = lookup("PIPELINE_MAX_PAYLOAD_BYTES").and_then(|s| s.parse().ok()) {
            config.max_payload_bytes = n;
        }
        if let Some(marker) = lookup("PIPELINE_REDACTION_MARKER").filter(|m| !m.is_empty()) {
            config.redaction_marker = marker;
        }

        config
    }

    /// Store tunables derived from this configuration.
    pub fn store_config(&self) -> StoreConfig {
        let base = Duration::from_millis(self.retry_backoff_ms);
        StoreConfig {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            op_timeout: Duration::from_millis(self.op_timeout_ms),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_backoff: base,
                max_backoff: base.saturating_mul(25),
            },
            max_payload_bytes: self.max_payload_bytes,
            max_payload_depth: DEFAULT_MAX_DEPTH,
            redaction_marker: self.redaction_marker.clone(),
            ..StoreConfig::default()
        }
    }
}
