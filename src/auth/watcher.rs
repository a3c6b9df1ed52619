use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::auth::token::SessionExpiring;
use crate::config::MIN_WATCH_INTERVAL;
use crate::error::Result;

/// What the watcher polls on every tick
#[async_trait]
pub trait SessionProbe: Send + Sync {
    /// Whether the session is still usable
    async fn check_active(&self) -> Result<bool>;

    /// Best-effort seconds left on the token (0 when there is no valid user)
    async fn remaining_time(&self) -> u64;
}

/// Watcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Running,
}

/// Periodic liveness check
#[derive(Debug, Clone, Copy)]
pub struct SessionWatcher {
    interval: Duration,
}

impl SessionWatcher {
    /// Intervals shorter than [`MIN_WATCH_INTERVAL`] are raised to it
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_WATCH_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start polling `probe`. Every tick that finds the session inactive calls
    /// `on_inactive` once; the watcher never stops on its own.
    pub fn start<F>(&self, probe: Arc<dyn SessionProbe>, on_inactive: F) -> WatchHandle
    where
        F: Fn(SessionExpiring) + Send + Sync + 'static,
    {
        let period = self.interval;
        info!(interval_secs = period.as_secs_f64(), "Starting session watcher");

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the first check happens one period in
            ticker.tick().await;

            loop {
                ticker.tick().await;
                run_tick(probe.as_ref(), &on_inactive).await;
            }
        });

        WatchHandle {
            handle: Some(handle),
        }
    }
}

/// One watcher iteration. Returns true when `on_inactive` was called.
pub(crate) async fn run_tick<F>(probe: &dyn SessionProbe, on_inactive: &F) -> bool
where
    F: Fn(SessionExpiring) + ?Sized,
{
    debug!("Checking session state");

    match probe.check_active().await {
        Ok(true) => false,
        Ok(false) => {
            let remaining_time = probe.remaining_time().await;
            warn!(remaining_time, "Session expiring, notifying subscribers");
            on_inactive(SessionExpiring { remaining_time });
            true
        }
        Err(e) => {
            warn!(error = %e, "Session check failed, will retry on next tick");
            false
        }
    }
}

/// Disposer for a running watcher; stops the task on `stop` or drop
#[derive(Debug)]
pub struct WatchHandle {
    handle: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn state(&self) -> WatcherState {
        match &self.handle {
            Some(handle) if !handle.is_finished() => WatcherState::Running,
            _ => WatcherState::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == WatcherState::Running
    }

    /// Stop polling. Calling this more than once is harmless.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Session watcher stopped");
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
