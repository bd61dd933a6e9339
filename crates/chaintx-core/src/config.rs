//! Stream configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::cursor::CursorLimits;
use crate::error::IngestError;

/// Configuration for one ingestion stream.
///
/// Deserializes from camelCase JSON. The monitor's older key names
/// (`ethNodeUrl`, `pollInterval`) are accepted as aliases and unknown keys
/// are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestConfig {
    /// JSON-RPC endpoint of the node.
    #[serde(alias = "ethNodeUrl")]
    pub node_url: String,
    /// Chain slug, part of the checkpoint key.
    pub chain: String,
    /// Stream name, part of the checkpoint key.
    pub stream_id: String,
    /// Cadence between head polls.
    #[serde(alias = "pollInterval")]
    pub poll_interval_seconds: u64,
    /// Undelivered items the output channel holds before blocking.
    pub channel_capacity: usize,
    /// Missing blocks that may be filled in one advance.
    pub max_gap_depth: u64,
    /// Recorded blocks that may be rolled back in one advance.
    pub max_reorg_depth: u64,
    /// First retry delay after a transient failure.
    pub backoff_base_ms: u64,
    /// Upper bound on the retry delay.
    pub backoff_cap_ms: u64,
    /// Random spread applied to each retry delay (0.0 ..= 1.0).
    pub jitter_fraction: f64,
    /// Per-request timeout for the node client.
    pub request_timeout_seconds: u64,
    /// Where to persist the cursor; `None` keeps it in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_path: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            node_url: "http://localhost:8545".into(),
            chain: "ethereum".into(),
            stream_id: "default".into(),
            poll_interval_seconds: 10,
            channel_capacity: 10,
            max_gap_depth: 64,
            max_reorg_depth: 12,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            jitter_fraction: 0.1,
            request_timeout_seconds: 30,
            cursor_path: None,
        }
    }
}

impl IngestConfig {
    /// Load a JSON config file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IngestError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse a JSON config and validate it.
    pub fn from_json_str(raw: &str) -> Result<Self, IngestError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| IngestError::ConfigInvalid(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.node_url.trim().is_empty() {
            return Err(invalid("nodeUrl must not be empty"));
        }
        if self.poll_interval_seconds == 0 {
            return Err(invalid("pollIntervalSeconds must be greater than zero"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channelCapacity must be greater than zero"));
        }
        if self.backoff_base_ms == 0 {
            return Err(invalid("backoffBaseMs must be greater than zero"));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(invalid("backoffCapMs must not be below backoffBaseMs"));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(invalid("jitterFraction must be within 0.0 ..= 1.0"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(invalid("requestTimeoutSeconds must be greater than zero"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn cursor_limits(&self) -> CursorLimits {
        CursorLimits {
            max_gap_depth: self.max_gap_depth,
            max_reorg_depth: self.max_reorg_depth,
        }
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
            jitter_fraction: self.jitter_fraction,
        }
    }
}

fn invalid(reason: &str) -> IngestError {
    IngestError::ConfigInvalid(reason.to_string())
}
