use harmony_types::{HybridClock, HybridTimestamp, ManualTimeSource};
use std::sync::Arc;

fn manual_clock(start: u64) -> (HybridClock, Arc<ManualTimeSource>) {
    let source = Arc::new(ManualTimeSource::new(start));
    (HybridClock::with_source(source.clone()), source)
}

// ── Local ticks ──────────────────────────────────────────────────

#[test]
fn next_follows_physical_time() {
    let (clock, source) = manual_clock(1_000);
    assert_eq!(clock.next(), HybridTimestamp::new(1_000, 0));
    source.advance(5);
    assert_eq!(clock.next(), HybridTimestamp::new(1_005, 0));
}

#[test]
fn next_is_monotonic_when_time_stalls() {
    let (clock, _source) = manual_clock(1_000);
    let a = clock.next();
    let b = clock.next();
    let c = clock.next();
    assert!(a < b && b < c);
    assert_eq!(c, HybridTimestamp::new(1_000, 2));
}

#[test]
fn next_is_monotonic_when_time_goes_backwards() {
    let (clock, source) = manual_clock(1_000);
    let a = clock.next();
    source.set(10);
    assert!(clock.next() > a);
}

// ── Observing remote time ────────────────────────────────────────

#[test]
fn observe_pushes_local_commits_past_remote() {
    let (clock, _source) = manual_clock(1_000);
    let remote = HybridTimestamp::new(5_000, 3);
    clock.observe(&remote);
    assert!(clock.next() > remote);
}

#[test]
fn observe_older_timestamp_is_ignored() {
    let (clock, _source) = manual_clock(1_000);
    let a = clock.next();
    clock.observe(&HybridTimestamp::new(10, 0));
    assert_eq!(clock.latest(), a);
}

#[test]
fn system_clock_produces_increasing_timestamps() {
    let clock = HybridClock::new();
    let a = clock.next();
    let b = clock.next();
    assert!(b > a);
}
