use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream};
use tokio::time;
use tracing::{trace, warn};

use crate::config::DEFAULT_RESOLVE_TIMEOUT;
use crate::types::ProbeOutcome;

/// Classifies one port of a fixed target as open or closed.
///
/// Implementations must return within their own time budget and must not keep
/// per-port state between calls: the same port probed twice against an unchanged
/// target yields the same outcome.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, port: u16) -> ProbeOutcome;
}

/// TCP connect prober for a single host, resolved once up front.
#[derive(Debug, Clone)]
pub struct TcpProber {
    ip: Option<IpAddr>,
    timeout: Duration,
}

impl TcpProber {
    /// Prober for an already-known address.
    pub fn new(ip: IpAddr, timeout: Duration) -> Self {
        Self {
            ip: Some(ip),
            timeout,
        }
    }

    /// Resolve `host` (IP literal or name), preferring IPv4. When resolution fails
    /// or times out, every probe from the returned prober reports `Closed`.
    pub async fn resolve(host: &str, resolve_timeout: Duration, timeout: Duration) -> Self {
        let ip = resolve_host(host, resolve_timeout).await;
        if ip.is_none() {
            warn!(host, "could not resolve host; all ports will be reported closed");
        }
        Self { ip, timeout }
    }

    pub fn target(&self) -> Option<IpAddr> {
        self.ip
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, port: u16) -> ProbeOutcome {
        let Some(ip) = self.ip else {
            return ProbeOutcome::Closed(port);
        };
        probe_addr(SocketAddr::new(ip, port), self.timeout).await
    }
}

/// Probe `(host, port)` with a single connect attempt bounded by `timeout`.
///
/// Name resolution has its own budget (`DEFAULT_RESOLVE_TIMEOUT`); a host that
/// does not resolve is reported `Closed`.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> ProbeOutcome {
    TcpProber::resolve(host, DEFAULT_RESOLVE_TIMEOUT, timeout)
        .await
        .probe(port)
        .await
}

/// One non-blocking connect to `addr`. The socket is closed on every exit path:
/// a connected stream is dropped immediately, and on timeout the pending connect
/// future (which owns the socket) is dropped by `time::timeout`.
pub async fn probe_addr(addr: SocketAddr, timeout: Duration) -> ProbeOutcome {
    let port = addr.port();
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            trace!(%addr, "connect completed");
            ProbeOutcome::Open(port)
        }
        Ok(Err(e)) => {
            log_connect_error(addr, &e);
            ProbeOutcome::Closed(port)
        }
        Err(_elapsed) => {
            trace!(%addr, "connect timed out");
            ProbeOutcome::Closed(port)
        }
    }
}

fn log_connect_error(addr: SocketAddr, e: &io::Error) {
    use io::ErrorKind as K;
    match e.kind() {
        K::ConnectionRefused
        | K::ConnectionReset
        | K::ConnectionAborted
        | K::TimedOut
        | K::AddrNotAvailable
        | K::HostUnreachable
        | K::NetworkUnreachable
        | K::NetworkDown => {
            trace!(%addr, error = %e, "connect failed");
        }
        // Anything else (e.g. descriptor exhaustion) points at the local system.
        _ => warn!(%addr, error = %e, "unexpected socket error; port reported closed"),
    }
}

async fn resolve_host(host: &str, resolve_timeout: Duration) -> Option<IpAddr> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    let addrs: Vec<SocketAddr> = match time::timeout(resolve_timeout, lookup_host((host, 0))).await {
        Ok(Ok(it)) => it.collect(),
        Ok(Err(e)) => {
            trace!(host, error = %e, "resolution failed");
            return None;
        }
        Err(_) => {
            trace!(host, "resolution timed out");
            return None;
        }
    };
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(SocketAddr::ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::{TcpListener, TcpSocket};
    use tokio::time::Instant;

    const T: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn listening_port_is_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let out = probe("127.0.0.1", port, T).await;
        assert_eq!(out, ProbeOutcome::Open(port));
    }

    #[tokio::test]
    async fn closed_port_stays_closed() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let prober = TcpProber::new(IpAddr::V4(Ipv4Addr::LOCALHOST), T);
        for _ in 0..3 {
            assert_eq!(prober.probe(port).await, ProbeOutcome::Closed(port));
        }
    }

    #[tokio::test]
    async fn unresolvable_host_is_closed() {
        let prober = TcpProber::resolve("no-such-host.invalid", T, T).await;
        assert!(prober.target().is_none());
        assert_eq!(prober.probe(80).await, ProbeOutcome::Closed(80));
    }

    #[tokio::test]
    async fn ip_literal_resolves_without_lookup() {
        let prober = TcpProber::resolve(" 127.0.0.1 ", T, T).await;
        assert_eq!(prober.target(), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    /// Loopback listener whose accept queue is full. Further SYNs are dropped,
    /// so new connects hang until the caller gives up.
    async fn saturated_listener() -> (TcpListener, SocketAddr, Vec<TcpStream>) {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();
        let mut held = Vec::new();
        for _ in 0..64 {
            match time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => held.push(stream),
                _ => break,
            }
        }
        (listener, addr, held)
    }

    #[tokio::test]
    async fn hanging_connect_times_out_as_closed() {
        let (_listener, addr, _held) = saturated_listener().await;
        let budget = Duration::from_millis(100);

        for _ in 0..3 {
            let start = Instant::now();
            let out = probe_addr(addr, budget).await;
            let elapsed = start.elapsed();
            assert_eq!(out, ProbeOutcome::Closed(addr.port()));
            assert!(elapsed >= Duration::from_millis(90), "returned after {elapsed:?}");
            assert!(elapsed <= budget + Duration::from_millis(400), "blocked for {elapsed:?}");
        }
    }
}
