use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Counts jobs that are queued or running so callers can wait for the pool to settle.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    in_flight: AtomicUsize,
    notify: Notify,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    pub fn enter(self: &Arc<Self>) -> ActivityGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn wait_until_idle(&self) {
        self.wait_until_idle_with(|| async {}).await;
    }

    /// Like [`wait_until_idle`](Self::wait_until_idle) but runs `on_wait` each
    /// time the tracker is observed busy.
    pub async fn wait_until_idle_with<F, Fut>(&self, mut on_wait: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }

            let notified = self.notify.notified();
            on_wait().await;

            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

pub struct ActivityGuard {
    tracker: Arc<ActivityTracker>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.tracker.release();
    }
}
