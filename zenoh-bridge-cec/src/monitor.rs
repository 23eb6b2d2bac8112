//! Two-speed polling with external reset.
//!
//! A [`Monitor`] calls `on_reset` then `on_poll` as soon as it starts, polls
//! every `burst_interval` for `burst_duration`, and then falls back to
//! polling every `idle_interval`. [`Monitor::reset`] restarts the whole
//! sequence from the top. Each monitor runs on its own Tokio task, so a slow
//! callback only delays that monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;

/// Callback run on the monitor's task.
pub type MonitorAction = Box<dyn Fn() + Send + Sync>;

/// Cadence settings for a [`Monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub idle_interval: Duration,
    pub burst_interval: Duration,
    pub burst_duration: Duration,
}

impl MonitorConfig {
    pub fn new(idle_interval: Duration, burst_interval: Duration, burst_duration: Duration) -> Self {
        Self {
            idle_interval,
            burst_interval,
            burst_duration,
        }
    }
}

/// Handle to a running monitor task.
///
/// The task stops when the handle is dropped or when the cancellation token
/// it was spawned with is cancelled.
pub struct Monitor {
    reset: Arc<Notify>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Monitor {
    /// Start a monitor on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<R, P>(
        on_reset: R,
        on_poll: P,
        config: MonitorConfig,
        cancel: CancellationToken,
    ) -> Self
    where
        R: Fn() + Send + Sync + 'static,
        P: Fn() + Send + Sync + 'static,
    {
        let reset = Arc::new(Notify::new());
        let task = tokio::spawn(run(
            Box::new(on_reset),
            Box::new(on_poll),
            config,
            reset.clone(),
            cancel.clone(),
        ));

        Self {
            reset,
            cancel,
            task,
        }
    }

    /// Re-run `on_reset` and `on_poll` now and start a new burst.
    ///
    /// Resets requested while a callback is running collapse into one.
    pub fn reset(&self) {
        self.reset.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    on_reset: MonitorAction,
    on_poll: MonitorAction,
    config: MonitorConfig,
    reset: Arc<Notify>,
    cancel: CancellationToken,
) {
    'burst: loop {
        on_reset();
        on_poll();

        let started = Instant::now();
        let burst_end = started + config.burst_duration;
        let mut bursting = true;
        let mut ticker = interval_at(started + config.burst_interval, config.burst_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // Order matters: at the end of a burst the cadence switch wins
            // over a tick falling on the same instant.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::trace!("Monitor stopped");
                    return;
                }
                _ = reset.notified() => continue 'burst,
                _ = sleep_until(burst_end), if bursting => {
                    bursting = false;
                    ticker = interval_at(Instant::now() + config.idle_interval, config.idle_interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                }
                _ = ticker.tick() => on_poll(),
            }
        }
    }
}
