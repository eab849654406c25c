//! Clock Abstraction
//!
//! Ingestion and flush timestamps are read through this trait so tests can
//! pin time. Values are whole seconds since the Unix epoch, the resolution the
//! collector stores.

use crate::metrics::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time for the engine
///
/// Implementations:
/// - `SystemClock`: real system time
/// - `ManualClock`: time that only moves when told to
pub trait Clock: Send + Sync + Clone + 'static {
    /// Current time in seconds since the Unix epoch
    fn now(&self) -> Timestamp;
}

/// Clock backed by `SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    secs: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_secs: Timestamp) -> Self {
        ManualClock {
            secs: Arc::new(AtomicU64::new(start_secs)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.secs.fetch_add(duration.as_secs(), Ordering::SeqCst);
    }

    pub fn set(&self, secs: Timestamp) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.secs.load(Ordering::SeqCst)
    }
}
