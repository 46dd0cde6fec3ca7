use std::time::Duration;

/// Engine tuning knobs. The core reads nothing from the environment; the binary
/// maps its CLI flags onto this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Budget for a single connect attempt.
    pub probe_timeout: Duration,
    /// Budget for resolving the target host once, before any worker starts.
    pub resolve_timeout: Duration,
    /// Worker count used when a request does not specify one.
    pub default_workers: usize,
    /// Hard ceiling on concurrent workers for any request.
    pub max_workers: usize,
}

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WORKERS: usize = 50;
pub const MAX_WORKERS: usize = 5_000;

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            default_workers: DEFAULT_WORKERS,
            max_workers: MAX_WORKERS,
        }
    }
}

impl ScanConfig {
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_default_workers(mut self, workers: usize) -> Self {
        self.default_workers = workers.clamp(1, self.max_workers);
        self
    }

    /// Number of workers to spawn for `requested` workers over `port_count` ports.
    pub fn effective_workers(&self, requested: Option<usize>, port_count: usize) -> usize {
        requested
            .unwrap_or(self.default_workers)
            .min(port_count)
            .clamp(1, self.max_workers.max(1))
    }
}
