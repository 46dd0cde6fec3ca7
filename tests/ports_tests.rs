use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use port_sweep_rs::ports::{parse_range, PortQueue};

#[test]
fn queue_holds_each_port_in_range_exactly_once() {
    for (start, end) in [(1u16, 1u16), (1, 100), (1000, 1500), (65000, 65535)] {
        let q = PortQueue::from_range(start, end);
        assert_eq!(q.len(), usize::from(end - start) + 1);

        let mut seen = HashSet::new();
        while let Some(p) = q.try_take() {
            assert!(p >= start && p <= end);
            assert!(seen.insert(p));
        }
        assert_eq!(seen.len(), q.len());
    }
}

#[test]
fn concurrent_takers_never_share_a_port() {
    let q = Arc::new(PortQueue::from_range(1, 20_000));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let q = q.clone();
            thread::spawn(move || {
                let mut mine = Vec::new();
                while let Some(p) = q.try_take() {
                    mine.push(p);
                }
                mine
            })
        })
        .collect();

    let mut all = HashSet::new();
    let mut count = 0usize;
    for h in handles {
        for p in h.join().expect("taker thread") {
            count += 1;
            all.insert(p);
        }
    }
    assert_eq!(count, 20_000);
    assert_eq!(all.len(), 20_000);
    assert!(q.is_empty());
}

#[test]
fn cli_ranges() {
    assert_eq!(parse_range("22").expect("parse ok"), (22, 22));
    assert_eq!(parse_range("1-65535").expect("parse ok"), (1, 65535));
    assert!(parse_range("0-10").is_err());
    assert!(parse_range("10-").is_err());
}
