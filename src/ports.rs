use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, ScanError};

/// Ports still to be probed in one scan.
///
/// The queue is filled once, before any worker starts, and then drained through a
/// single atomic cursor: each `fetch_add` hands out a distinct index, so concurrent
/// callers never receive the same port and no lock sits on the scanning hot path.
/// A port that has been taken is never re-enqueued.
#[derive(Debug, Default)]
pub struct PortQueue {
    ports: Vec<u16>,
    cursor: AtomicUsize,
}

impl PortQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_range(start: u16, end: u16) -> Self {
        let mut q = Self::new();
        q.enqueue_range(start, end);
        q
    }

    /// Append every port in `[start, end]`. Requires exclusive access, which rules
    /// out concurrent writers while workers are draining.
    pub fn enqueue_range(&mut self, start: u16, end: u16) {
        if start > end {
            return;
        }
        self.ports.reserve(usize::from(end - start) + 1);
        self.ports.extend(start..=end);
    }

    /// Withdraw one port, or `None` once the queue is exhausted.
    pub fn try_take(&self) -> Option<u16> {
        // Workers stop at the first `None`, so the cursor overshoots by at most one per worker.
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.ports.get(idx).copied()
    }

    /// Total ports enqueued.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn remaining(&self) -> usize {
        self.ports
            .len()
            .saturating_sub(self.cursor.load(Ordering::Relaxed))
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// Parse a CLI port range: either a single port (`80`) or an inclusive range
/// (`1-1024`). Whitespace around either bound is ignored.
pub fn parse_range(s: &str) -> Result<(u16, u16)> {
    let s = s.trim();
    if let Some((a, b)) = s.split_once('-') {
        let start = parse_port_str(a.trim())
            .map_err(|e| ScanError::Validation(format!("invalid start in range {s}: {e}")))?;
        let end = parse_port_str(b.trim())
            .map_err(|e| ScanError::Validation(format!("invalid end in range {s}: {e}")))?;
        if start > end {
            return Err(ScanError::Validation(format!(
                "invalid range {start}-{end} (start > end)"
            )));
        }
        return Ok((start, end));
    }
    let p = parse_port_str(s)
        .map_err(|e| ScanError::Validation(format!("invalid port value {s}: {e}")))?;
    Ok((p, p))
}

fn parse_port_str(s: &str) -> std::result::Result<u16, String> {
    let val: u32 = s.parse::<u32>().map_err(|e| e.to_string())?;
    if val == 0 || val > u32::from(u16::MAX) {
        return Err(format!("port out of range: {val}"));
    }
    Ok(val as u16)
}
