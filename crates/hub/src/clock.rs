//! Wall-clock source injected into the irrigation service and scheduler so
//! tests can drive time explicitly.

use std::sync::{Arc, Mutex};

use time::{Duration, OffsetDateTime, UtcOffset};

pub type SharedClock = Arc<dyn Clock>;

pub trait Clock: Send + Sync {
    /// Current local wall-clock time.
    fn now(&self) -> OffsetDateTime;
}

/// Real clock: UTC shifted into the farm's configured offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Build from a whole-hour offset as found in the config file. Invalid
    /// offsets fall back to UTC.
    pub fn from_hours(hours: i8) -> Self {
        Self::new(UtcOffset::from_hms(hours, 0, 0).unwrap_or(UtcOffset::UTC))
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(UtcOffset::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
