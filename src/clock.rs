//! Time source abstraction
//!
//! Health-check staleness and request-history windows read time through a
//! [`Clock`] so tests can advance time deterministically instead of sleeping.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic instant, used for elapsed-time comparisons
    fn now(&self) -> Instant;

    /// Wall-clock time, used only for reporting
    fn system_now(&self) -> SystemTime;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Create the default shared clock
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Manually advanced clock for tests and simulations
///
/// Starts at the real current time and only moves when [`ManualClock::advance`]
/// is called.
#[derive(Debug)]
pub struct ManualClock {
    base_instant: Instant,
    base_system: SystemTime,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base_instant: Instant::now(),
            base_system: SystemTime::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base_instant + self.offset()
    }

    fn system_now(&self) -> SystemTime {
        self.base_system + self.offset()
    }
}

/// Milliseconds since the UNIX epoch, saturating to 0 for pre-epoch clocks
pub fn unix_millis(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as u64,
        Err(_) => {
            tracing::error!("System clock is before UNIX epoch, reporting timestamp 0");
            0
        }
    }
}
