//! Start/stop handle for periodic background loops.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A background loop that runs a tick every `interval` until stopped.
///
/// Start and stop are idempotent. Each tick runs to completion; the
/// cancellation signal is checked between ticks.
pub struct PeriodicTask {
    name: &'static str,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the loop. Returns `false` if it was already running.
    pub fn start<F>(&self, interval: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let mut running = self.running.lock();
        if let Some((_, handle)) = running.as_ref() {
            if !handle.is_finished() {
                return false;
            }
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let name = self.name;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of an interval fires immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!(task = name, "Tick");
                        tick().await;
                    }
                }
                if cancelled.is_cancelled() {
                    break;
                }
            }
            debug!(task = name, "Background loop exited");
        });

        info!(task = name, interval_ms = interval.as_millis() as u64, "Started background loop");
        *running = Some((token, handle));
        true
    }

    /// Signal the loop to exit. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some((token, _handle)) => {
                token.cancel();
                info!(task = self.name, "Stopping background loop");
                true
            }
            None => false,
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some((token, _)) = self.running.get_mut().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_idempotent() {
        let task = PeriodicTask::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ticks);
        let make_tick = move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        };
        assert!(task.start(Duration::from_secs(1), make_tick.clone()));
        assert!(!task.start(Duration::from_secs(1), make_tick));
        assert!(task.is_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        assert!(task.stop());
        assert!(!task.stop());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
