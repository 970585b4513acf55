//! Periodic time decay.
//!
//! The [`Ticker`] fires on a fixed period and converts the wall time that
//! actually elapsed into whole minutes of decay. Sub-minute remainders carry
//! over, and ticks missed under load are folded into the next fire rather
//! than replayed.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Converts elapsed wall time into whole decay minutes.
#[derive(Debug, Default, Clone)]
pub struct DecayClock {
    carry: Duration,
}

impl DecayClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `elapsed` and returns the whole minutes now due.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        let total = self.carry + elapsed;
        let minutes = total.as_secs() / 60;
        self.carry = total - Duration::from_secs(minutes * 60);
        u32::try_from(minutes).unwrap_or(u32::MAX)
    }

    /// Time accumulated toward the next minute.
    pub fn carry(&self) -> Duration {
        self.carry
    }
}

/// Fixed-period driver for registry decay.
#[derive(Debug)]
pub struct Ticker {
    interval: Interval,
    last_fire: Instant,
    clock: DecayClock,
}

impl Ticker {
    /// Creates a ticker whose first fire is one `period` from now.
    pub fn new(period: Duration) -> Self {
        let start = Instant::now();
        let mut interval = time::interval_at(start + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            last_fire: start,
            clock: DecayClock::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    /// Waits for the next fire and returns the minutes of decay it covers.
    ///
    /// Often zero: with a 30 second period every other fire carries a minute.
    pub async fn tick(&mut self) -> u32 {
        self.interval.tick().await;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fire);
        self.last_fire = now;
        self.clock.advance(elapsed)
    }
}
