//! Time sources for the writer.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use super::version::{from_micros, to_micros, Instant};

/// Source of write instants.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// Wall clock that never returns the same microsecond twice.
///
/// Two writes in the same microsecond would otherwise produce an empty
/// `[now, now)` interval.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        let wall = to_micros(Utc::now());
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or(wall);
        let micros = wall.max(previous + 1);
        from_micros(micros).unwrap_or_else(|_| Utc::now())
    }
}

/// Deterministic clock advancing by a fixed step on every call.
#[derive(Debug)]
pub struct SteppingClock {
    next: AtomicI64,
    step: i64,
}

impl SteppingClock {
    #[must_use]
    pub fn starting_at(start: Instant, step_micros: i64) -> Self {
        Self {
            next: AtomicI64::new(to_micros(start)),
            step: step_micros.max(1),
        }
    }

    /// The instant the next call to `now` will return.
    #[must_use]
    pub fn peek(&self) -> Instant {
        from_micros(self.next.load(Ordering::Acquire)).unwrap_or_else(|_| Utc::now())
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> Instant {
        let micros = self.next.fetch_add(self.step, Ordering::AcqRel);
        from_micros(micros).unwrap_or_else(|_| Utc::now())
    }
}
