//! Single-flight access-token renewal.
//!
//! Every request that fails with an expired token calls
//! [`RenewalCoordinator::renew`]. The first caller while idle starts the one
//! renewal; everyone (the starter included) is queued and released in FIFO
//! order with that renewal's single outcome.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::ApiError;

/// A request suspended until the in-flight renewal settles.
type PendingRequest = oneshot::Sender<Result<String, ApiError>>;

#[derive(Default)]
struct RenewalState {
    in_flight: bool,
    queue: VecDeque<PendingRequest>,
}

/// Owned by one `ApiClient` (and its clones); never process-global.
#[derive(Clone, Default)]
pub struct RenewalCoordinator {
    state: Arc<Mutex<RenewalState>>,
}

impl RenewalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RenewalState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    /// Number of requests waiting on the in-flight renewal.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Wait for a fresh access token.
    ///
    /// `start` is only invoked when no renewal is in flight. The renewal runs
    /// on its own task so it completes even if this caller is dropped.
    pub async fn renew<F, Fut>(&self, start: F) -> Result<String, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ApiError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let is_starter = {
            let mut state = self.lock();
            state.queue.push_back(tx);
            if state.in_flight {
                debug!(queued = state.queue.len(), "Renewal in flight, request queued");
                false
            } else {
                state.in_flight = true;
                true
            }
        };

        if is_starter {
            debug!("Starting token renewal");
            let renewal = start();
            let coordinator = self.clone();
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(renewal)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(ApiError::InvalidResponse("Token renewal panicked".to_string()))
                    });
                coordinator.settle(outcome);
            });
        }

        rx.await.unwrap_or_else(|_| {
            Err(ApiError::RenewalFailed(Box::new(ApiError::InvalidResponse(
                "Renewal ended without an outcome".to_string(),
            ))))
        })
    }

    /// Release every queued request, in arrival order, with `outcome`.
    fn settle(&self, outcome: Result<String, ApiError>) {
        let waiters = {
            let mut state = self.lock();
            state.in_flight = false;
            std::mem::take(&mut state.queue)
        };

        match &outcome {
            Ok(_) => debug!(drained = waiters.len(), "Token renewal succeeded"),
            Err(e) => warn!(drained = waiters.len(), error = %e, "Token renewal failed"),
        }

        for waiter in waiters {
            // A dropped waiter no longer cares about the result.
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;
    use tokio::sync::Notify;

    use super::*;

    async fn wait_for_pending(coordinator: &RenewalCoordinator, n: usize) {
        for _ in 0..1000 {
            if coordinator.pending() >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {} pending requests, got {}", n, coordinator.pending());
    }

    fn gated_renewal(
        calls: &Arc<AtomicUsize>,
        gate: &Arc<Notify>,
        outcome: Result<String, ApiError>,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<String, ApiError>> {
        let calls = calls.clone();
        let gate = gate.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                gate.notified().await;
                outcome
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_renewal() {
        let coordinator = RenewalCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = coordinator.clone();
                let start = gated_renewal(&calls, &gate, Ok("T2".to_string()));
                tokio::spawn(async move { coordinator.renew(start).await })
            })
            .collect();

        wait_for_pending(&coordinator, 3).await;
        assert!(coordinator.is_in_flight());
        gate.notify_one();

        for result in join_all(handles).await {
            assert_eq!(result.unwrap().unwrap(), "T2");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_in_flight());
        assert_eq!(coordinator.pending(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_delivered_to_every_waiter() {
        let coordinator = RenewalCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                let start = gated_renewal(&calls, &gate, Err(ApiError::Unauthorized { code: None }));
                tokio::spawn(async move { coordinator.renew(start).await })
            })
            .collect();

        wait_for_pending(&coordinator, 4).await;
        gate.notify_one();

        for result in join_all(handles).await {
            assert!(matches!(result.unwrap(), Err(ApiError::Unauthorized { code: None })));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_renewal_starts_after_settle() {
        let coordinator = RenewalCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for token in ["T2", "T3"] {
            let calls = calls.clone();
            let token = token.to_string();
            let result = coordinator
                .renew(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, ApiError>(token) }
                })
                .await;
            assert!(result.is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_block_others() {
        let coordinator = RenewalCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let starter = {
            let coordinator = coordinator.clone();
            let start = gated_renewal(&calls, &gate, Ok("T2".to_string()));
            tokio::spawn(async move { coordinator.renew(start).await })
        };
        wait_for_pending(&coordinator, 1).await;
        let waiter = {
            let coordinator = coordinator.clone();
            let start = gated_renewal(&calls, &gate, Ok("unused".to_string()));
            tokio::spawn(async move { coordinator.renew(start).await })
        };

        wait_for_pending(&coordinator, 2).await;
        starter.abort();
        gate.notify_one();

        assert_eq!(waiter.await.unwrap().unwrap(), "T2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
