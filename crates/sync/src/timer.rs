//! Cancellable one-shot timers on the tokio clock.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// A scheduled callback that can be cancelled before it fires.
///
/// Dropping the handle does not cancel the timer; call [`TimerHandle::cancel`].
/// A callback that already started keeps running unless it is cancelled,
/// so owners remove the handle from their slot before running side effects.
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Runs `callback` after `delay`.
    pub fn schedule<F>(delay: Duration, callback: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback.await;
        });
        Self {
            abort: task.abort_handle(),
        }
    }

    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}
