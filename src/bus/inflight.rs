use std::sync::Arc;

use tokio::sync::Notify;

/// Async analogue of the source's root/child `sync.WaitGroup` pair: `Add`
/// before handing work off, `Done` when it completes, `wait_zero` blocks
/// until the count returns to zero. `tokio` has no async `WaitGroup`, so
/// this is built directly on a counter plus `Notify`.
#[derive(Debug, Default)]
pub struct InFlightCounter {
    count: std::sync::Mutex<u64>,
    notify: Notify,
}

impl InFlightCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, n: u64) {
        if n == 0 {
            return;
        }
        let mut count = self.count.lock().unwrap();
        *count += n;
    }

    pub fn done(&self) {
        let mut count = self.count.lock().unwrap();
        debug_assert!(*count > 0, "done() called more times than add()");
        if *count > 0 {
            *count -= 1;
        }
        if *count == 0 {
            self.notify.notify_waiters();
        }
    }

    pub fn current(&self) -> u64 {
        *self.count.lock().unwrap()
    }

    /// Resolves once the counter is at zero. If it is already zero this
    /// still performs one scheduling point so callers can't starve other
    /// tasks by spin-waiting.
    ///
    /// The `Notified` future is created *before* the counter is checked, not
    /// after: `Notify::notify_waiters` stores no permit for latecomers (only
    /// `notify_one` does), so a `done()` that reaches zero in the gap
    /// between checking `current()` and calling `notified()` would
    /// otherwise fire `notify_waiters()` with nobody registered to hear it,
    /// and this would block forever. A `Notified` future created before the
    /// call to `notify_waiters()` is still guaranteed to observe it, even
    /// if it hasn't been polled yet.
    pub async fn wait_zero(&self) {
        loop {
            let notified = self.notify.notified();
            if self.current() == 0 {
                return;
            }
            notified.await;
        }
    }
}
