use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// One scan request: a host and an inclusive port range. Never mutated once a scan starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,
    pub workers: Option<usize>,
}

impl ScanRequest {
    pub fn new(host: impl Into<String>, start_port: u16, end_port: u16) -> Self {
        Self {
            host: host.into(),
            start_port,
            end_port,
            workers: None,
        }
    }

    /// Every TCP port, 1 through 65535.
    pub fn full_range(host: impl Into<String>) -> Self {
        Self::new(host, 1, u16::MAX)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Number of ports in the range, or 0 if the range is inverted.
    pub fn port_count(&self) -> usize {
        if self.start_port > self.end_port {
            0
        } else {
            usize::from(self.end_port - self.start_port) + 1
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ScanError::Validation("host must not be empty".into()));
        }
        if self.start_port == 0 {
            return Err(ScanError::Validation(
                "ports must be between 1 and 65535".into(),
            ));
        }
        if self.start_port > self.end_port {
            return Err(ScanError::Validation(format!(
                "invalid range {}-{} (start > end)",
                self.start_port, self.end_port
            )));
        }
        if self.workers == Some(0) {
            return Err(ScanError::Validation(
                "worker count must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Result of probing a single port. Only `Open` outcomes are retained by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeOutcome {
    Open(u16),
    Closed(u16),
}

impl ProbeOutcome {
    pub fn port(&self) -> u16 {
        match *self {
            ProbeOutcome::Open(p) | ProbeOutcome::Closed(p) => p,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ProbeOutcome::Open(_))
    }
}

/// Terminal state of a scan that actually ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanStatus {
    /// Natural completion with at least one open port, sorted ascending.
    Completed { open_ports: Vec<u16> },
    NoOpenPorts,
    /// Cancelled via `stop_scan`; nothing was persisted.
    Stopped,
}

/// Incremental notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Started { host: String, total: u64 },
    PortOpen(u16),
    Finished(ScanStatus),
}

/// Record handed to the persistence sink. Field names are part of the on-disk format.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub host: String,
    pub open_ports: Vec<u16>,
}

/// Snapshot of the live progress counters.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total: u64,
    pub scanned: u64,
    pub open: u64,
}

/// What `stop_scan` did. Neither case is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    StopRequested,
    NotRunning,
}
