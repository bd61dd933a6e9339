//! Fluent builder API for assembling an ingestion stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use chaintx_evm::IngestBuilder;
//!
//! let config = IngestBuilder::new()
//!     .node_url("https://eth.example.org")
//!     .chain("ethereum")
//!     .stream_id("wallet-watch")
//!     .poll_interval_seconds(12)
//!     .max_reorg_depth(12)
//!     .build()
//!     .unwrap();
//! ```

use std::path::PathBuf;

use chaintx_core::config::IngestConfig;
use chaintx_core::error::IngestError;

use crate::fetcher::EvmChainClient;
use crate::rpc::HttpTransport;

/// Fluent builder for [`IngestConfig`].
#[derive(Default)]
pub struct IngestBuilder {
    config: IngestConfig,
}

impl IngestBuilder {
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
        }
    }

    /// Set the JSON-RPC endpoint.
    pub fn node_url(mut self, url: impl Into<String>) -> Self {
        self.config.node_url = url.into();
        self
    }

    /// Set the chain slug (used for checkpoint keys).
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set the stream ID (used for checkpoint keys).
    pub fn stream_id(mut self, id: impl Into<String>) -> Self {
        self.config.stream_id = id.into();
        self
    }

    pub fn poll_interval_seconds(mut self, secs: u64) -> Self {
        self.config.poll_interval_seconds = secs;
        self
    }

    /// Set how many undelivered items the output holds before blocking.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn max_gap_depth(mut self, depth: u64) -> Self {
        self.config.max_gap_depth = depth;
        self
    }

    pub fn max_reorg_depth(mut self, depth: u64) -> Self {
        self.config.max_reorg_depth = depth;
        self
    }

    /// Set the retry delay schedule for transient node failures.
    pub fn backoff_ms(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.config.backoff_base_ms = base_ms;
        self.config.backoff_cap_ms = cap_ms;
        self
    }

    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.config.jitter_fraction = fraction;
        self
    }

    pub fn request_timeout_seconds(mut self, secs: u64) -> Self {
        self.config.request_timeout_seconds = secs;
        self
    }

    /// Persist the cursor to this file.
    pub fn cursor_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cursor_path = Some(path.into());
        self
    }

    /// Return the config without validating it.
    pub fn build_config(self) -> IngestConfig {
        self.config
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Validate the config and create an HTTP client for its node.
    pub fn connect(self) -> Result<(IngestConfig, EvmChainClient<HttpTransport>), IngestError> {
        let config = self.build()?;
        let client = EvmChainClient::from_config(&config)?;
        Ok((config, client))
    }
}
