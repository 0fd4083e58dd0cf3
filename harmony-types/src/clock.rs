//! Clock that stamps locally authored commits.
//!
//! The clock keeps the last timestamp it handed out or observed, so local
//! commits always sort after everything this replica has seen, even when the
//! physical clock goes backwards.

use crate::timestamp::{system_millis, HybridTimestamp};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Source of physical time in milliseconds since the Unix epoch.
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Reads the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        system_millis()
    }
}

/// A time source that only moves when told to. Used by tests and by
/// replays that need reproducible timestamps.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    millis: AtomicU64,
}

impl ManualTimeSource {
    #[must_use]
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Hybrid logical clock for one replica.
pub struct HybridClock {
    source: Arc<dyn TimeSource>,
    last: Mutex<HybridTimestamp>,
}

impl HybridClock {
    /// Creates a clock driven by the system wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(Arc::new(SystemTimeSource))
    }

    /// Creates a clock driven by a custom time source.
    #[must_use]
    pub fn with_source(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            last: Mutex::new(HybridTimestamp::MIN),
        }
    }

    /// Returns a timestamp strictly greater than every timestamp previously
    /// returned or observed.
    pub fn next(&self) -> HybridTimestamp {
        let mut last = self.last.lock().unwrap();
        *last = last.tick_at(self.source.now_millis());
        *last
    }

    /// Folds a timestamp received from another replica into the clock.
    pub fn observe(&self, remote: &HybridTimestamp) {
        let mut last = self.last.lock().unwrap();
        if remote > &*last {
            *last = last.receive_at(remote, self.source.now_millis());
        }
    }

    /// The last timestamp handed out or observed.
    pub fn latest(&self) -> HybridTimestamp {
        *self.last.lock().unwrap()
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HybridClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridClock")
            .field("last", &self.latest())
            .finish()
    }
}
