//! Process-wide monotonic time source and tick timer service.
//!
//! Grounded on the `tokio::select!` / `tokio::time::interval` pattern used
//! for the periodic sync loops in the sibling time-sync protocol: a single
//! spawned task owns an `interval`, and cancellation is a dropped handle
//! rather than a flag the loop has to poll.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

/// Returns strictly non-decreasing microsecond timestamps from an
/// unspecified epoch (process start), unaffected by wall-clock adjustments.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Arc<StdInstant>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            epoch: Arc::new(StdInstant::now()),
        }
    }

    /// Microseconds elapsed since this clock was constructed.
    pub fn now(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    /// Invokes `callback(now, interval_us)` approximately every `interval_us`
    /// microseconds until the returned [`TickHandle`] is dropped or
    /// cancelled. `now` is read once per tick and handed to the callback
    /// rather than re-read inside it, so a slow callback does not see a
    /// different `now` than the tick that triggered it.
    pub fn schedule_tick<F, Fut>(&self, interval_us: i64, callback: F) -> TickHandle
    where
        F: Fn(i64, i64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let clock = self.clone();
        let interval_us = interval_us.max(1);
        let period = Duration::from_micros(interval_us as u64);
        let join = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = clock.now();
                callback(now, interval_us).await;
            }
        });
        TickHandle { join }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels the associated tick loop when dropped or when [`TickHandle::cancel`]
/// is called explicitly.
pub struct TickHandle {
    join: JoinHandle<()>,
}

impl TickHandle {
    pub fn cancel(self) {
        self.join.abort();
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}
