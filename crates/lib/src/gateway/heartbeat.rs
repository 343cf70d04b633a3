//! Heartbeat scheduler: a repeating timer that calls back on every interval.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Runs `on_tick` every interval on a tokio task until stopped. At most one timer runs at a time.
#[derive(Debug, Default)]
pub struct HeartbeatScheduler {
    handle: Option<JoinHandle<()>>,
    interval: Option<Duration>,
}

impl HeartbeatScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking. The first tick fires one full `interval` after this call.
    /// Returns false (and changes nothing) if a timer is already running.
    pub fn start<F>(&mut self, interval: Duration, mut on_tick: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        if self.is_running() {
            log::debug!("heartbeat already running, ignoring start");
            return false;
        }
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.handle = Some(tokio::spawn(async move {
            loop {
                ticker.tick().await;
                on_tick();
            }
        }));
        self.interval = Some(interval);
        log::debug!("heartbeat started every {:?}", interval);
        true
    }

    /// Cancel the timer. No further ticks are delivered after this returns.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            log::debug!("heartbeat stopped");
        }
        self.interval = None;
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Interval of the running timer, if any.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
