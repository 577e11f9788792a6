use super::*;

/// Source of "now" for schedulers and windows.
pub trait Clock: Send + Sync {
    /// Milliseconds since the clock's origin.
    fn now(&self) -> EventTime;
}

/// Monotonic wall clock measured from its construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> EventTime {
        duration_ms(self.origin.elapsed())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: EventTime) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn advance(&self, by: Duration) -> EventTime {
        self.now.fetch_add(duration_ms(by), Ordering::SeqCst) + duration_ms(by)
    }

    /// Move the clock to `t`. The clock never runs backwards.
    pub fn set(&self, t: EventTime) {
        self.now.fetch_max(t, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> EventTime {
        self.now.load(Ordering::SeqCst)
    }
}
