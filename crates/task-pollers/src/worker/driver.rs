//! Poll loops for a [`TaskPoller`]

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{PollerError, TaskPoller};

/// Pause after a failed poll or response before polling again
pub const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// A set of poll loops sharing one poller
///
/// Each loop repeatedly calls [`TaskPoller::poll_task`] and then
/// [`TaskPoller::process_task`]. A task that has been polled is always
/// processed, even when shutdown is requested meanwhile.
///
/// # Example
///
/// ```ignore
/// let shutdown = CancellationToken::new();
/// let group = PollerGroup::spawn(Arc::new(poller), 4, shutdown.clone());
///
/// // ...
///
/// group.shutdown_and_join().await;
/// ```
pub struct PollerGroup {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PollerGroup {
    /// Start `concurrency` poll loops (at least one)
    pub fn spawn<P>(poller: Arc<P>, concurrency: usize, shutdown: CancellationToken) -> Self
    where
        P: TaskPoller + 'static,
    {
        let concurrency = concurrency.max(1);
        info!(concurrency, "Starting poll loops");

        let handles = (0..concurrency)
            .map(|worker| {
                let poller = Arc::clone(&poller);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { poll_loop(poller, worker, shutdown).await })
            })
            .collect();

        Self { shutdown, handles }
    }

    /// Number of poll loops
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Token that stops every loop of this group
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop all loops and wait for them to finish
    pub async fn shutdown_and_join(self) {
        self.shutdown.cancel();

        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Poll loop panicked");
            }
        }

        info!("Poll loops stopped");
    }
}

async fn poll_loop<P: TaskPoller>(poller: Arc<P>, worker: usize, shutdown: CancellationToken) {
    debug!(worker, "Poll loop started");

    while !shutdown.is_cancelled() {
        let polled = tokio::select! {
            polled = poller.poll_task() => polled,
            _ = shutdown.cancelled() => break,
        };

        let result = match polled {
            Ok(task) => poller.process_task(task).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {}
            Err(PollerError::Shutdown) => break,
            Err(e) => {
                if e.is_invariant_violation() {
                    error!(worker, error = %e, "Task failed with invariant violation");
                } else {
                    warn!(worker, error = %e, "Task failed");
                }

                tokio::select! {
                    _ = tokio::time::sleep(ERROR_PAUSE) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }
    }

    debug!(worker, "Poll loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails every poll after the first one
    #[derive(Default)]
    struct Flaky {
        polls: AtomicU32,
        processed: AtomicU32,
    }

    #[async_trait]
    impl TaskPoller for Flaky {
        type Task = u32;

        async fn poll_task(&self) -> Result<u32, PollerError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(n)
            } else {
                Err(ServiceError::ServiceBusy("overloaded".into()).into())
            }
        }

        async fn process_task(&self, _task: u32) -> Result<(), PollerError> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_pauses_after_error() {
        let poller = Arc::new(Flaky::default());
        let group = PollerGroup::spawn(Arc::clone(&poller), 1, CancellationToken::new());

        // Two polls at start, then one after each pause
        tokio::time::sleep(ERROR_PAUSE * 3 + Duration::from_millis(500)).await;
        group.shutdown_and_join().await;

        assert_eq!(poller.processed.load(Ordering::SeqCst), 1);
        assert_eq!(poller.polls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_zero_concurrency_runs_one_loop() {
        let group = PollerGroup::spawn(Arc::new(Flaky::default()), 0, CancellationToken::new());
        assert_eq!(group.len(), 1);
        assert!(!group.is_empty());

        let token = group.shutdown_token();
        group.shutdown_and_join().await;
        assert!(token.is_cancelled());
    }
}
