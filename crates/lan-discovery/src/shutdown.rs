//! Cooperative shutdown signalling and supervised background tasks.
//!
//! A [`ShutdownTrigger`] owns the sending side of a `watch` channel. Every
//! blocking loop in the crate holds a [`Shutdown`] and races it against its
//! socket receive, delay or connect. Dropping the trigger counts as a
//! shutdown, so a task can never outlive the owner that started it.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

/// Create a linked trigger/listener pair.
#[must_use]
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, Shutdown { rx })
}

/// Sending half: fires the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Signal every linked [`Shutdown`]. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Create another listener linked to this trigger.
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    /// Whether the signal has already fired.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Listening half, cheap to clone into every task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown is requested or the trigger is dropped.
    ///
    /// Cancel-safe, so it can sit in any `tokio::select!` arm.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// A long-lived task paired with its own shutdown trigger.
///
/// [`Supervised::stop`] fires the trigger and joins the task, so callers get a
/// join-on-exit guarantee instead of an orphaned `JoinHandle`.
#[derive(Debug)]
pub struct Supervised<T> {
    name: &'static str,
    trigger: ShutdownTrigger,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Supervised<T> {
    /// Spawn `task` with a fresh shutdown listener linked to `parent`.
    ///
    /// The task stops when either its own trigger or `parent` fires.
    pub fn spawn<F, Fut>(name: &'static str, parent: &Shutdown, task: F) -> Self
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (trigger, own) = channel();

        let relay = trigger.clone();
        let parent = parent.clone();
        let own_for_relay = own.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => relay.trigger(),
                _ = own_for_relay.cancelled() => {}
            }
        });

        let handle = tokio::spawn(task(own));
        tracing::debug!("Started supervised task {}", name);
        Self {
            name,
            trigger,
            handle,
        }
    }

    /// Task name given at spawn time.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has already returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait for it to exit.
    pub async fn stop(self) -> Result<T, JoinError> {
        self.trigger.trigger();
        let result = self.handle.await;
        tracing::debug!("Supervised task {} exited", self.name);
        result
    }

    /// Wait for the task to exit on its own (or via the parent signal).
    pub async fn join(self) -> Result<T, JoinError> {
        self.handle.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_listener() {
        let (trigger, shutdown) = channel();
        assert!(!shutdown.is_triggered());

        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        });

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("listener should wake")
            .expect("task should not panic");
        assert!(shutdown.is_triggered());
        assert!(trigger.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, shutdown) = channel();
        drop(trigger);

        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .expect("dropping the trigger should release listeners");
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_supervised_stop_joins_task() {
        let (_root, root_shutdown) = channel();
        let task = Supervised::spawn("ticker", &root_shutdown, |shutdown| async move {
            let mut ticks = 0u32;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => ticks += 1,
                }
            }
            ticks
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(task.name(), "ticker");
        let ticks = tokio::time::timeout(Duration::from_secs(1), task.stop())
            .await
            .expect("stop should be prompt")
            .expect("task should not panic");
        assert!(ticks > 0);
    }

    #[tokio::test]
    async fn test_parent_shutdown_propagates() {
        let (root, root_shutdown) = channel();
        let task = Supervised::spawn("child", &root_shutdown, |shutdown| async move {
            shutdown.cancelled().await;
        });

        root.trigger();
        tokio::time::timeout(Duration::from_secs(1), task.join())
            .await
            .expect("child should stop with its parent")
            .expect("task should not panic");
    }
}
