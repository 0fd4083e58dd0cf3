use chrono::{DateTime, TimeZone, Utc};
use harmony_types::HybridTimestamp;
use proptest::prelude::*;

// ── Construction ─────────────────────────────────────────────────

#[test]
fn now_has_zero_logical() {
    let ts = HybridTimestamp::now();
    assert_eq!(ts.logical(), 0);
    assert!(ts.wall_time() > 0);
}

#[test]
fn new_from_components() {
    let ts = HybridTimestamp::new(42, 7);
    assert_eq!(ts.wall_time(), 42);
    assert_eq!(ts.logical(), 7);
}

#[test]
fn datetime_conversion_uses_wall_time() {
    let at = Utc.with_ymd_and_hms(2000, 1, 2, 0, 0, 0).unwrap();
    let ts = HybridTimestamp::from_datetime(at);
    assert_eq!(ts.logical(), 0);
    assert_eq!(ts.to_datetime(), at);
}

#[test]
fn pre_epoch_datetime_clamps_to_zero() {
    let at = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(HybridTimestamp::from_datetime(at), HybridTimestamp::MIN);
}

#[test]
fn wall_times_beyond_chrono_are_not_representable() {
    let latest = DateTime::<Utc>::MAX_UTC.timestamp_millis() as u64;
    assert!(HybridTimestamp::new(latest, 0).is_representable());
    assert!(!HybridTimestamp::new(latest + 1, 0).is_representable());
    assert!(!HybridTimestamp::new(i64::MAX as u64, 0).is_representable());
    assert!(!HybridTimestamp::new((1 << 63) + 5, 0).is_representable());
    assert!(HybridTimestamp::MIN.is_representable());
}

// ── Ordering ─────────────────────────────────────────────────────

#[test]
fn ordering_by_wall_time_then_logical() {
    let a = HybridTimestamp::new(100, 9);
    let b = HybridTimestamp::new(200, 0);
    let c = HybridTimestamp::new(200, 1);
    assert!(a < b);
    assert!(b < c);
    assert!(a.is_before(&c));
    assert!(c.is_after(&a));
}

// ── tick / receive ───────────────────────────────────────────────

#[test]
fn tick_moves_to_newer_physical_time() {
    let ts = HybridTimestamp::new(100, 4);
    assert_eq!(ts.tick_at(150), HybridTimestamp::new(150, 0));
}

#[test]
fn tick_with_stalled_clock_bumps_logical() {
    let ts = HybridTimestamp::new(100, 4);
    assert_eq!(ts.tick_at(100), HybridTimestamp::new(100, 5));
    assert_eq!(ts.tick_at(50), HybridTimestamp::new(100, 5));
}

#[test]
fn receive_from_future_peer_follows_peer() {
    let local = HybridTimestamp::new(100, 0);
    let remote = HybridTimestamp::new(300, 2);
    assert_eq!(local.receive_at(&remote, 200), HybridTimestamp::new(300, 3));
}

#[test]
fn receive_with_equal_wall_times_takes_max_logical() {
    let local = HybridTimestamp::new(300, 7);
    let remote = HybridTimestamp::new(300, 2);
    assert_eq!(local.receive_at(&remote, 100), HybridTimestamp::new(300, 8));
}

#[test]
fn receive_when_physical_time_leads_resets_logical() {
    let local = HybridTimestamp::new(100, 7);
    let remote = HybridTimestamp::new(200, 2);
    assert_eq!(local.receive_at(&remote, 500), HybridTimestamp::new(500, 0));
}

#[test]
fn serde_shape_is_stable() {
    let ts = HybridTimestamp::new(1234, 5);
    let json = serde_json::to_string(&ts).unwrap();
    assert_eq!(json, r#"{"wall_time":1234,"logical":5}"#);
}

proptest! {
    #[test]
    fn receive_is_after_both_inputs(
        lw in 0u64..1_000_000, ll in 0u32..1000,
        rw in 0u64..1_000_000, rl in 0u32..1000,
        now in 0u64..1_000_000,
    ) {
        let local = HybridTimestamp::new(lw, ll);
        let remote = HybridTimestamp::new(rw, rl);
        let merged = local.receive_at(&remote, now);
        prop_assert!(merged > local);
        prop_assert!(merged > remote);
    }

    #[test]
    fn tick_is_strictly_monotonic(w in 0u64..1_000_000, l in 0u32..1000, now in 0u64..1_000_000) {
        let ts = HybridTimestamp::new(w, l);
        prop_assert!(ts.tick_at(now) > ts);
    }
}
