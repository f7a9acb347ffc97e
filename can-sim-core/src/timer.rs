//! Per-node one-shot timers
//!
//! Every node owns at most one timer. A timer is a deadline on a monotonic
//! [`Clock`]; the event loop polls it for expiry once per iteration. There is
//! no periodic mode: a node keeps a timer running by re-arming it from its
//! `on_timer` callback.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock {
    /// Time elapsed since an arbitrary, fixed origin
    fn now(&self) -> Duration;
}

/// [`Clock`] backed by [`std::time::Instant`]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven [`Clock`] for tests and offline runs
///
/// Clones share the same time, so a test can keep a handle and advance the
/// clock after giving a copy to the simulator.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Move time forward by whole milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerStatus {
    /// Nothing armed
    #[default]
    Idle,
    /// `on_timer` is running; the timer is cancelled afterwards unless the
    /// node re-arms it
    ArmedAwaitingDecision,
    /// Deadline pending
    Armed,
}

/// Convert a millisecond interval (fractions allowed) to a [`Duration`]
///
/// The value is truncated to whole nanoseconds. Zero, negative and NaN
/// intervals map to `None`, meaning "cancel".
pub fn interval_from_ms(interval_ms: f64) -> Option<Duration> {
    if interval_ms.is_nan() || interval_ms <= 0.0 {
        return None;
    }
    let nanos = (interval_ms * 1_000_000.0) as u64;
    if nanos == 0 {
        return None;
    }
    Some(Duration::from_nanos(nanos))
}

/// A node's timer slot
#[derive(Debug, Clone, Default)]
pub struct NodeTimer {
    status: TimerStatus,
    interval: Duration,
    deadline: Duration,
}

impl NodeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot deadline `interval` after `now`, replacing any prior one
    pub fn arm(&mut self, now: Duration, interval: Duration) {
        self.status = TimerStatus::Armed;
        self.interval = interval;
        self.deadline = now + interval;
    }

    /// Drop the deadline and forget the interval
    pub fn cancel(&mut self) {
        *self = Self::default();
    }

    /// Enter the awaiting-decision state before `on_timer` runs
    ///
    /// Returns the interval the timer was armed with.
    pub fn begin_decision(&mut self) -> Duration {
        self.status = TimerStatus::ArmedAwaitingDecision;
        self.interval
    }

    /// True if the deadline has passed
    pub fn expired(&self, now: Duration) -> bool {
        self.status == TimerStatus::Armed && now >= self.deadline
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: Duration) -> Duration {
        match self.status {
            TimerStatus::Armed => self.deadline.saturating_sub(now),
            _ => Duration::ZERO,
        }
    }

    pub fn status(&self) -> TimerStatus {
        self.status
    }

    /// True unless the timer is idle
    pub fn is_active(&self) -> bool {
        self.status != TimerStatus::Idle
    }

    /// Current interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current interval in (fractional) milliseconds, as scripts see it
    pub fn interval_ms(&self) -> f64 {
        self.interval.as_nanos() as f64 / 1_000_000.0
    }
}
