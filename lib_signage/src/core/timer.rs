//! # Cancellable Scheduled Tasks
//!
//! Every timer in the engine (rotation, error retry, config refresh, health
//! check, foreground presence) is a `ScheduledTask`: a tokio task paired with a
//! `CancellationToken`. Cancelling or dropping the handle stops the task, so a
//! torn-down component can never receive a late callback.
//!
//! `TimerSlot` holds at most one armed one-shot per concern. Arming cancels the
//! previous task, and every arming gets a fresh `TimerId`; a firing that was
//! already queued before the slot was re-armed carries an old id and is
//! discarded by `TimerSlot::fire`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one arming of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A spawned timer task that is cancelled when the handle is cancelled or dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Runs `action` once after `delay` unless cancelled first.
    pub fn once<F>(delay: Duration, action: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = child.cancelled() => {}
                _ = tokio::time::sleep(delay) => action.await,
            }
        });
        Self { token, handle }
    }

    /// Runs `action` every `period`, first after one full period, until cancelled.
    /// The next run is scheduled only after the previous one completes.
    pub fn repeating<F, Fut>(period: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = action() => {}
                }
            }
        });
        Self { token, handle }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A single-concern timer that posts an event to the control loop when it fires.
#[derive(Debug)]
pub struct TimerSlot<E> {
    name: &'static str,
    tx: mpsc::UnboundedSender<E>,
    armed: Option<(TimerId, ScheduledTask)>,
}

impl<E: Send + 'static> TimerSlot<E> {
    pub fn new(name: &'static str, tx: mpsc::UnboundedSender<E>) -> Self {
        Self {
            name,
            tx,
            armed: None,
        }
    }

    /// Cancels whatever is armed and arms a new one-shot. `event` builds the
    /// message posted on expiry from the new timer id.
    pub fn arm(&mut self, delay: Duration, event: impl FnOnce(TimerId) -> E) -> TimerId {
        self.cancel();
        let id = TimerId::next();
        let message = event(id);
        let tx = self.tx.clone();
        let task = ScheduledTask::once(delay, async move {
            // A closed channel means the control loop is gone; nothing to notify.
            let _ = tx.send(message);
        });
        tracing::trace!(timer = self.name, delay_ms = delay.as_millis() as u64, "Timer armed");
        self.armed = Some((id, task));
        id
    }

    pub fn cancel(&mut self) {
        if let Some((_, task)) = self.armed.take() {
            task.cancel();
            tracing::trace!(timer = self.name, "Timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Accepts a firing. Returns `true` and disarms when `id` is the current
    /// arming; returns `false` for stale or unknown ids.
    pub fn fire(&mut self, id: TimerId) -> bool {
        match &self.armed {
            Some((current, _)) if *current == id => {
                self.armed = None;
                true
            }
            _ => {
                tracing::trace!(timer = self.name, "Ignoring stale timer firing");
                false
            }
        }
    }
}

impl<E> Drop for TimerSlot<E> {
    fn drop(&mut self) {
        if let Some((_, task)) = self.armed.take() {
            task.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn slot_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new("test", tx);
        let started = Instant::now();
        let id = slot.arm(Duration::from_secs(5), |id| id);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, id);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(slot.fire(fired));
        assert!(!slot.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_supersedes_previous_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new("test", tx);
        let first = slot.arm(Duration::from_secs(1), |id| id);
        let second = slot.arm(Duration::from_secs(3), |id| id);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, second);
        assert!(!slot.fire(first));
        assert!(slot.fire(second));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_slot_cancels_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel::<TimerId>();
        {
            let mut slot = TimerSlot::new("test", tx);
            slot.arm(Duration::from_secs(1), |id| id);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_task_runs_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let task = ScheduledTask::repeating(Duration::from_secs(30), move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.cancel();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
