//! Cancellable single-shot countdown driven by the tokio timer.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct Countdown {
    period: Duration,
    active: Option<ActiveCountdown>,
}

struct ActiveCountdown {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Countdown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            active: None,
        }
    }

    /// Starts ticking down from `ticks`.
    ///
    /// `on_tick(remaining)` runs for `ticks, ticks - 1, ..., 1`, each at the
    /// start of its period; `on_complete` runs once after the last period.
    /// A countdown already running on this instance is cancelled first.
    /// Must be called from within a tokio runtime.
    pub fn begin<T, C>(&mut self, ticks: NonZeroU32, mut on_tick: T, on_complete: C)
    where
        T: FnMut(u32) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.cancel();

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let period = self.period;

        let task = tokio::spawn(async move {
            for remaining in (1..=ticks.get()).rev() {
                if flag.load(Ordering::Acquire) {
                    return;
                }
                on_tick(remaining);
                tokio::time::sleep(period).await;
            }
            if !flag.load(Ordering::Acquire) {
                on_complete();
            }
        });

        self.active = Some(ActiveCountdown { cancelled, task });
    }

    /// Stops the countdown. No tick or completion is delivered afterwards.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancelled.store(true, Ordering::Release);
            active.task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| !a.task.is_finished() && !a.cancelled.load(Ordering::Acquire))
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.cancel();
    }
}
