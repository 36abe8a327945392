//! Generation-guarded debounce timer

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Delays work until input settles.
///
/// Every `arm` bumps the request generation and cancels the pending timer. Work
/// that already started is not cancelled; it must check `is_current` before
/// applying its result.
pub struct Debouncer {
    delay: Duration,
    generation: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: AtomicU64::new(0),
            timer: Mutex::new(None),
        }
    }

    /// Arm the timer; `fire` runs with the new generation once the delay elapses
    pub fn arm<F, Fut>(&self, fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach so a later arm cannot abort a request already in flight
            tokio::spawn(fire(generation));
        });

        let previous = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        generation
    }

    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}
