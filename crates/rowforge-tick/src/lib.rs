//! Admission tick pacing and countdown arithmetic for Rowforge.
//!
//! Two independent pieces:
//!
//! - [`TickScheduler`] paces a loop at a fixed interval (one second for
//!   room admission) and skips ahead when the loop falls behind.
//! - [`Countdown`] is the pure arithmetic of an admission countdown: how
//!   much time is left and whether this tick should be announced.
//!
//! # Integration
//!
//! The scheduler is meant to sit inside a `tokio::select!` loop next to
//! whatever can end the countdown early:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = room_filled.notified() => { /* start now */ }
//!         _ = scheduler.wait_for_tick() => {
//!             let step = countdown.tick();
//!             if step.announce { /* broadcast step.remaining */ }
//!         }
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickConfig {
    /// Time between ticks. Clamped to at least [`Self::MIN_INTERVAL`].
    pub interval: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
        }
    }
}

impl TickConfig {
    /// One tick per second.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
    /// Shortest accepted interval.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }

    /// Clamps out-of-range values. Called by [`TickScheduler::new`].
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_secs_f64() * 1000.0,
                "tick interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Information about a fired tick, returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// `true` if this tick fired more than 10% of an interval late.
    pub overrun: bool,
}

/// Fixed-interval tick scheduler. One per admission driver.
///
/// A late tick fires once and the schedule restarts from then, so a
/// stalled loop never sees a burst of missed ticks.
#[derive(Debug)]
pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    next_tick: Instant,
}

impl TickScheduler {
    /// Creates a scheduler whose first tick is one interval from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        debug!(
            interval_ms = config.interval.as_secs_f64() * 1000.0,
            "tick scheduler created"
        );
        Self {
            next_tick: Instant::now() + config.interval,
            config,
            tick_count: 0,
        }
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self::new(TickConfig::with_interval(interval))
    }

    /// Waits until the next tick is due.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves the
    /// schedule untouched.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let scheduled = self.next_tick;
        let interval = self.config.interval;
        time::sleep_until(scheduled).await;

        let now = Instant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(scheduled);
        let overrun = late_by > interval / 10;
        self.next_tick = if overrun {
            warn!(
                tick = self.tick_count,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "tick overrun, skipping ahead"
            );
            now + interval
        } else {
            scheduled + interval
        };

        trace!(tick = self.tick_count, overrun, "tick fired");
        TickInfo {
            tick: self.tick_count,
            overrun,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }
}

// ---------------------------------------------------------------------------
// Countdown
// ---------------------------------------------------------------------------

/// The result of advancing a [`Countdown`] by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTick {
    /// Ticks left after this one. Zero means the countdown expired.
    pub remaining: u32,
    /// Whether this tick should be broadcast to the room.
    pub announce: bool,
}

impl CountdownTick {
    pub fn expired(&self) -> bool {
        self.remaining == 0
    }
}

/// Admission countdown.
///
/// Announces every `announce_every` elapsed ticks, and on every tick once
/// `remaining <= final_countdown`. Expiry itself is never announced; the
/// caller starts or cancels the room instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    total: u32,
    remaining: u32,
    announce_every: u32,
    final_countdown: u32,
}

impl Countdown {
    pub fn new(total: u32, announce_every: u32, final_countdown: u32) -> Self {
        Self {
            total,
            remaining: total,
            announce_every,
            final_countdown,
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn elapsed(&self) -> u32 {
        self.total - self.remaining
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    /// Advances by one tick. A no-op once expired.
    pub fn tick(&mut self) -> CountdownTick {
        self.remaining = self.remaining.saturating_sub(1);
        let announce = !self.is_expired() && self.should_announce();
        CountdownTick {
            remaining: self.remaining,
            announce,
        }
    }

    /// Ends the countdown early, e.g. when the room fills up.
    pub fn cancel(&mut self) {
        self.remaining = 0;
    }

    fn should_announce(&self) -> bool {
        let periodic = self.announce_every > 0 && self.elapsed() % self.announce_every == 0;
        periodic || self.remaining <= self.final_countdown
    }
}
