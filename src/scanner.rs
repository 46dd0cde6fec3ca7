use std::future::{poll_fn, Future};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Poll;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, trace, Instrument};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::ports::PortQueue;
use crate::probe::{Prober, TcpProber};
use crate::sink::ResultSink;
use crate::types::{
    ProbeOutcome, Progress, ScanEvent, ScanRecord, ScanRequest, ScanStatus, StopOutcome,
};

/// Live counters shared by the workers of one scan.
#[derive(Clone, Debug)]
pub struct SharedProgress {
    pub total: u64,
    pub scanned_done: Arc<AtomicU64>,
    pub open_count: Arc<AtomicU64>,
}

impl SharedProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            scanned_done: Arc::new(AtomicU64::new(0)),
            open_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            total: self.total,
            scanned: self.scanned_done.load(Ordering::Relaxed),
            open: self.open_count.load(Ordering::Relaxed),
        }
    }
}

/// Registry entry for the one scan allowed to run at a time.
#[derive(Debug)]
struct ActiveScan {
    id: u64,
    cancel: CancellationToken,
    gate: Arc<RwLock<()>>,
    progress: SharedProgress,
}

/// Everything one scan's workers share. Built fresh per `start_scan`.
struct ScanSession {
    id: u64,
    request: ScanRequest,
    queue: Arc<PortQueue>,
    open_ports: Arc<Mutex<Vec<u16>>>,
    cancel: CancellationToken,
    gate: Arc<RwLock<()>>,
    progress: SharedProgress,
    events: mpsc::UnboundedSender<ScanEvent>,
}

struct Inner {
    config: ScanConfig,
    sink: Option<Arc<dyn ResultSink>>,
    active: SyncMutex<Option<ActiveScan>>,
    next_id: AtomicU64,
}

/// Entry point for scans. Clones share the same registry, so at most one scan is
/// active across all clones.
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<Inner>,
}

impl Scanner {
    /// Scanner without persistence.
    pub fn new(config: ScanConfig) -> Self {
        Self::build(config, None)
    }

    /// Scanner that hands naturally completed, non-empty results to `sink`.
    pub fn with_sink(config: ScanConfig, sink: Arc<dyn ResultSink>) -> Self {
        Self::build(config, Some(sink))
    }

    fn build(config: ScanConfig, sink: Option<Arc<dyn ResultSink>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                active: SyncMutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Progress of the active scan, if any.
    pub fn progress(&self) -> Option<Progress> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|a| a.progress.snapshot())
    }

    /// Start scanning `request.host` with TCP connect probes.
    ///
    /// Must be called from within a tokio runtime. Returns immediately; the scan
    /// runs on a supervisor task observed through the returned handle.
    pub fn start_scan(&self, request: ScanRequest) -> Result<ScanHandle> {
        let host = request.host.trim().to_string();
        let resolve_timeout = self.inner.config.resolve_timeout;
        let probe_timeout = self.inner.config.probe_timeout;
        self.launch(request, async move {
            let prober = TcpProber::resolve(&host, resolve_timeout, probe_timeout).await;
            Arc::new(prober) as Arc<dyn Prober>
        })
    }

    /// Like `start_scan`, but probes through the given prober.
    pub fn start_scan_with(
        &self,
        request: ScanRequest,
        prober: Arc<dyn Prober>,
    ) -> Result<ScanHandle> {
        self.launch(request, async move { prober })
    }

    /// Request cancellation of the active scan. In-flight probes finish within
    /// their timeout; once this returns, no new probe begins.
    pub fn stop_scan(&self) -> StopOutcome {
        let active = self.inner.active.lock();
        match active.as_ref() {
            Some(a) if !a.cancel.is_cancelled() => {
                // Waits out workers between their flag check and the first poll of a probe.
                let _gate = a.gate.write();
                a.cancel.cancel();
                debug!(scan = a.id, "stop requested");
                StopOutcome::StopRequested
            }
            _ => StopOutcome::NotRunning,
        }
    }

    fn launch<F>(&self, request: ScanRequest, prober: F) -> Result<ScanHandle>
    where
        F: Future<Output = Arc<dyn Prober>> + Send + 'static,
    {
        request.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ScanError::Aborted(e.to_string()))?;

        let total = request.port_count();
        let workers = self.inner.config.effective_workers(request.workers, total);
        let cancel = CancellationToken::new();
        let gate = Arc::new(RwLock::new(()));
        let progress = SharedProgress::new(total as u64);

        let id = {
            let mut active = self.inner.active.lock();
            if active.is_some() {
                return Err(ScanError::AlreadyRunning);
            }
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            *active = Some(ActiveScan {
                id,
                cancel: cancel.clone(),
                gate: gate.clone(),
                progress: progress.clone(),
            });
            id
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(PortQueue::from_range(request.start_port, request.end_port));
        let span = debug_span!("scan", id, host = %request.host);
        let session = ScanSession {
            id,
            request,
            queue,
            open_ports: Arc::new(Mutex::new(Vec::new())),
            cancel,
            gate,
            progress,
            events: tx,
        };

        let scanner = self.clone();
        let task = runtime.spawn(
            async move { scanner.supervise(session, prober, workers).await }
            .instrument(span),
        );

        Ok(ScanHandle { events: rx, task })
    }

    async fn supervise<F>(&self, session: ScanSession, prober: F, workers: usize) -> ScanStatus
    where
        F: Future<Output = Arc<dyn Prober>> + Send,
    {
        let ScanSession {
            id,
            request,
            queue,
            open_ports,
            cancel,
            gate,
            progress,
            events,
        } = session;
        let host = request.host.trim().to_string();

        let _ = events.send(ScanEvent::Started {
            host: host.clone(),
            total: progress.total,
        });
        debug!(
            start = request.start_port,
            end = request.end_port,
            workers,
            "scan started"
        );
        let started = Instant::now();

        // Host resolution may be slow; a stop during it ends the scan right away.
        let prober = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            p = prober => Some(p),
        };

        if let Some(prober) = prober {
            let mut set = JoinSet::new();
            for worker in 0..workers {
                set.spawn(run_worker(
                    worker,
                    queue.clone(),
                    prober.clone(),
                    open_ports.clone(),
                    cancel.clone(),
                    gate.clone(),
                    progress.clone(),
                    events.clone(),
                ));
            }
            while let Some(res) = set.join_next().await {
                if let Err(e) = res {
                    error!(error = %e, "worker task failed");
                }
            }
        } else {
            debug!("stopped before any worker started");
        }

        let cancelled = self.release(id, &cancel);

        let mut found = std::mem::take(&mut *open_ports.lock().await);
        found.sort_unstable();
        found.dedup();

        let status = if cancelled {
            ScanStatus::Stopped
        } else if found.is_empty() {
            ScanStatus::NoOpenPorts
        } else {
            self.persist(ScanRecord {
                host,
                open_ports: found.clone(),
            })
            .await;
            ScanStatus::Completed { open_ports: found }
        };

        let snap = progress.snapshot();
        debug!(
            scanned = snap.scanned,
            open = snap.open,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ?status,
            "scan finished"
        );
        let _ = events.send(ScanEvent::Finished(status.clone()));
        status
    }

    /// Free the registry slot and report whether the scan had been cancelled.
    /// Both happen under the registry lock, so a concurrent `stop_scan` either
    /// lands before (scan is `Stopped`) or sees no active scan.
    fn release(&self, id: u64, cancel: &CancellationToken) -> bool {
        let mut active = self.inner.active.lock();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
        cancel.is_cancelled()
    }

    async fn persist(&self, record: ScanRecord) {
        let Some(sink) = self.inner.sink.as_ref() else {
            return;
        };
        if let Err(e) = sink.persist(&record).await {
            error!(error = %e, "failed to persist scan results");
        } else {
            debug!(ports = record.open_ports.len(), "results persisted");
        }
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<PortQueue>,
    prober: Arc<dyn Prober>,
    open_ports: Arc<Mutex<Vec<u16>>>,
    cancel: CancellationToken,
    gate: Arc<RwLock<()>>,
    progress: SharedProgress,
    events: mpsc::UnboundedSender<ScanEvent>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(port) = queue.try_take() else {
            break;
        };
        // A stop that raced with the withdrawal abandons the port.
        let Some(outcome) = gated_probe(prober.as_ref(), port, &cancel, &gate).await else {
            break;
        };
        progress.scanned_done.fetch_add(1, Ordering::Relaxed);

        if outcome.is_open() {
            let port = outcome.port();
            open_ports.lock().await.push(port);
            progress.open_count.fetch_add(1, Ordering::Relaxed);
            debug!(port, "port open");
            let _ = events.send(ScanEvent::PortOpen(port));
        }
    }
    trace!(worker, "worker exiting");
}

/// Probe `port` unless the scan is cancelled. The flag check and the first poll
/// of the probe run under the read side of `gate`; `stop_scan` cancels under the
/// write side, so no probe can begin after it returns.
async fn gated_probe(
    prober: &dyn Prober,
    port: u16,
    cancel: &CancellationToken,
    gate: &RwLock<()>,
) -> Option<ProbeOutcome> {
    let mut fut = prober.probe(port);
    let mut started = false;
    poll_fn(|cx| {
        if !started {
            let _read = gate.read();
            if cancel.is_cancelled() {
                return Poll::Ready(None);
            }
            started = true;
            return fut.as_mut().poll(cx).map(Some);
        }
        fut.as_mut().poll(cx).map(Some)
    })
    .await
}

/// Caller's view of a running scan.
#[derive(Debug)]
pub struct ScanHandle {
    events: mpsc::UnboundedReceiver<ScanEvent>,
    task: JoinHandle<ScanStatus>,
}

impl ScanHandle {
    /// Next notification; `None` once the scan has finished and all events were read.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    /// Wait for the terminal status. Unread events are discarded.
    pub async fn wait(self) -> Result<ScanStatus> {
        self.task
            .await
            .map_err(|e| ScanError::Aborted(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct EvenPorts;

    #[async_trait]
    impl Prober for EvenPorts {
        async fn probe(&self, port: u16) -> ProbeOutcome {
            if port % 2 == 0 {
                ProbeOutcome::Open(port)
            } else {
                ProbeOutcome::Closed(port)
            }
        }
    }

    #[tokio::test]
    async fn registry_cleared_after_completion() {
        let scanner = Scanner::new(ScanConfig::default());
        let handle = scanner
            .start_scan_with(ScanRequest::new("mock", 1, 10), Arc::new(EvenPorts))
            .unwrap();
        assert!(scanner.is_running());
        let status = handle.wait().await.unwrap();
        assert_eq!(
            status,
            ScanStatus::Completed {
                open_ports: vec![2, 4, 6, 8, 10]
            }
        );
        assert!(!scanner.is_running());
        assert!(scanner.progress().is_none());
        assert_eq!(scanner.stop_scan(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn events_end_with_finished() {
        let scanner = Scanner::new(ScanConfig::default());
        let mut handle = scanner
            .start_scan_with(ScanRequest::new("mock", 1, 4).with_workers(2), Arc::new(EvenPorts))
            .unwrap();
        let mut events = Vec::new();
        while let Some(ev) = handle.next_event().await {
            events.push(ev);
        }
        assert_eq!(
            events.first(),
            Some(&ScanEvent::Started {
                host: "mock".into(),
                total: 4
            })
        );
        assert!(matches!(events.last(), Some(ScanEvent::Finished(_))));
        let mut opened: Vec<u16> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::PortOpen(p) => Some(*p),
                _ => None,
            })
            .collect();
        opened.sort_unstable();
        assert_eq!(opened, vec![2, 4]);
    }

    #[tokio::test]
    async fn stop_while_resolving_reports_stopped_promptly() {
        let scanner = Scanner::new(ScanConfig::default());
        let handle = scanner
            .launch(ScanRequest::new("slow-dns", 1, 10), async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Arc::new(EvenPorts) as Arc<dyn Prober>
            })
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(scanner.stop_scan(), StopOutcome::StopRequested);

        let status = tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .expect("stop should not wait for resolution")
            .unwrap();
        assert_eq!(status, ScanStatus::Stopped);
        assert!(!scanner.is_running());
    }

    #[test]
    fn start_outside_runtime_is_rejected_without_registering() {
        let scanner = Scanner::new(ScanConfig::default());
        let err = scanner
            .start_scan_with(ScanRequest::new("mock", 1, 4), Arc::new(EvenPorts))
            .unwrap_err();
        assert!(matches!(err, ScanError::Aborted(_)));
        assert!(!scanner.is_running());
    }
}
