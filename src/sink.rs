//! Persistence of final scan results.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::types::ScanRecord;

pub const DEFAULT_OUTPUT: &str = "scan_results.json";

/// Receives the result set of a scan that completed naturally with at least one open port.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, record: &ScanRecord) -> Result<()>;
}

/// Writes the record as pretty JSON, replacing any previous file.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for JsonFileSink {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT)
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn persist(&self, record: &ScanRecord) -> Result<()> {
        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("failed to write results to {}", self.path.display()))?;
        Ok(())
    }
}
