use std::sync::Mutex;

use chrono::{FixedOffset, Utc};

use crate::model::Instant;

/// Source of "now" in campus-local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Real time shifted by the campus UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<Instant>,
}

impl FixedClock {
    pub fn new(now: Instant) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: Instant) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
