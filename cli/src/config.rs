//! Config file for the CLI: an ingestion config plus an optional `log`
//! section.

use std::path::Path;

use anyhow::Context;
use serde_json::Value;

use chaintx_core::config::IngestConfig;

use crate::logging::LogConfig;

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub ingest: IngestConfig,
    pub log: LogConfig,
}

impl CliConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut value: Value = serde_json::from_str(raw).context("malformed JSON")?;
        let log = match value.as_object_mut().and_then(|obj| obj.remove("log")) {
            Some(section) => serde_json::from_value(section).context("bad `log` section")?,
            None => LogConfig::default(),
        };
        let ingest: IngestConfig = serde_json::from_value(value)?;
        ingest.validate()?;
        Ok(Self { ingest, log })
    }
}
