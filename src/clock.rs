use std::sync::atomic::{AtomicI64, Ordering};

use crate::model::Ms;

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Ms;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ms {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}
