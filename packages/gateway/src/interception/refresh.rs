// packages/gateway/src/interception/refresh.rs
//! Single-flight session refresh
//!
//! When several guarded requests hit a 401 at once, only the first one issues
//! the refresh call. Everyone arriving while it is in flight parks on a
//! oneshot channel and receives the same outcome when it completes.
//!
//! # State machine
//!
//! ```text
//!            run() while idle
//!   IDLE ─────────────────────────► REFRESHING
//!    ▲                                  │  run() while refreshing:
//!    │   drain guard dropped:           │  enqueue waiter, park
//!    │   refreshing = false,            │
//!    └── broadcast outcome FIFO ◄───────┘
//! ```
//!
//! The refresh future runs in its own task, so cancelling the caller that
//! started it does not abort the refresh or strand the waiters.

use crate::observability::names;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Result of one refresh cycle, broadcast to every waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Failed,
}

impl RefreshOutcome {
    pub fn is_success(self) -> bool {
        self == RefreshOutcome::Refreshed
    }

    fn as_str(self) -> &'static str {
        match self {
            RefreshOutcome::Refreshed => "refreshed",
            RefreshOutcome::Failed => "failed",
        }
    }
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,

    /// Parked callers, in arrival order
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,

    /// Refresh cycles started since creation
    cycles: u64,
}

/// Snapshot of coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub refreshing: bool,
    pub waiters: usize,
    pub cycles: u64,
}

/// Returns the coordinator to idle and broadcasts the outcome when dropped
///
/// Dropping also happens on panic inside the refresh future, in which case
/// the outcome stays [`RefreshOutcome::Failed`]. A failed cycle runs
/// `on_failure` once, before any waiter is released.
struct DrainGuard {
    state: Arc<Mutex<RefreshState>>,
    outcome: RefreshOutcome,
    on_failure: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.outcome.is_success() {
            if let Some(on_failure) = self.on_failure.take() {
                on_failure();
            }
        }

        let waiters = {
            let mut state = self.state.lock();
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };

        if !waiters.is_empty() {
            debug!(
                "Releasing {} waiters with outcome {:?}",
                waiters.len(),
                self.outcome
            );
        }

        for waiter in waiters {
            // Receiver gone means that caller was cancelled
            let _ = waiter.send(self.outcome);
        }
    }
}

/// Serializes refresh calls across concurrent callers
pub struct RefreshCoordinator {
    state: Arc<Mutex<RefreshState>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RefreshState::default())),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.lock().refreshing
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn stats(&self) -> RefreshStats {
        let state = self.state.lock();
        RefreshStats {
            refreshing: state.refreshing,
            waiters: state.waiters.len(),
            cycles: state.cycles,
        }
    }

    /// Run `refresh` unless one is already in flight, then return the outcome
    ///
    /// `refresh` is only invoked by the caller that starts a cycle; callers
    /// joining an in-flight cycle drop it unused.
    pub async fn run<F, Fut>(&self, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome> + Send + 'static,
    {
        self.run_with_failure_hook(refresh, || {}).await
    }

    /// Like [`run`](Self::run), but a cycle that fails for any reason,
    /// including a panic in `refresh`, calls `on_failure` exactly once
    /// before its waiters resume
    pub async fn run_with_failure_hook<F, Fut, H>(&self, refresh: F, on_failure: H) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome> + Send + 'static,
        H: FnOnce() + Send + 'static,
    {
        // Check-and-set under one lock acquisition
        let parked = {
            let mut state = self.state.lock();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            } else {
                state.refreshing = true;
                state.cycles += 1;
                None
            }
        };

        if let Some(rx) = parked {
            debug!("Refresh already in flight, waiting for its outcome");
            metrics::counter!(names::REFRESH_JOINED_TOTAL).increment(1);
            return rx.await.unwrap_or(RefreshOutcome::Failed);
        }

        info!("Starting session refresh");
        let mut guard = DrainGuard {
            state: Arc::clone(&self.state),
            outcome: RefreshOutcome::Failed,
            on_failure: Some(Box::new(on_failure)),
        };
        let refresh = refresh();

        let handle = tokio::spawn(async move {
            guard.outcome = refresh.await;
            guard.outcome
        });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Refresh task aborted: {}", e);
                RefreshOutcome::Failed
            }
        };

        metrics::counter!(names::REFRESH_TOTAL, "outcome" => outcome.as_str()).increment(1);
        outcome
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::testing::wait_until;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Refresh future that blocks until the gate opens
    fn gated_refresh(
        gate: Arc<Semaphore>,
        calls: Arc<AtomicUsize>,
        outcome: RefreshOutcome,
    ) -> impl Future<Output = RefreshOutcome> + Send + 'static {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            let _permit = gate.acquire().await;
            outcome
        }
    }

    async fn exploding_refresh(gate: Arc<Semaphore>) -> RefreshOutcome {
        let _permit = gate.acquire().await;
        panic!("refresh exploded");
    }

    #[tokio::test]
    async fn test_idle_refresh_runs_once() {
        let coordinator = RefreshCoordinator::new();

        let outcome = coordinator.run(|| async { RefreshOutcome::Refreshed }).await;

        assert!(outcome.is_success());
        let stats = coordinator.stats();
        assert!(!stats.refreshing);
        assert_eq!(stats.waiters, 0);
        assert_eq!(stats.cycles, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let gate = Arc::new(Semaphore::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                coordinator
                    .run(move || gated_refresh(gate, calls, RefreshOutcome::Refreshed))
                    .await
            }));
        }

        wait_until(|| coordinator.waiter_count() == 4).await;
        assert!(coordinator.is_refreshing());

        gate.add_permits(1);
        for handle in handles {
            assert_eq!(handle.await.unwrap(), RefreshOutcome::Refreshed);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.stats().cycles, 1);
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_waiters_resume_in_fifo_order() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let gate = Arc::new(Semaphore::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let resumed = Arc::new(Mutex::new(Vec::new()));

        let leader = {
            let coordinator = Arc::clone(&coordinator);
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                coordinator
                    .run(move || gated_refresh(gate, calls, RefreshOutcome::Refreshed))
                    .await
            })
        };
        wait_until(|| coordinator.is_refreshing()).await;

        let mut waiters = Vec::new();
        for (position, name) in ["A", "B", "C"].into_iter().enumerate() {
            let coordinator_ref = Arc::clone(&coordinator);
            let resumed = Arc::clone(&resumed);
            waiters.push(tokio::spawn(async move {
                let outcome = coordinator_ref
                    .run(|| async { RefreshOutcome::Failed })
                    .await;
                resumed.lock().push(name);
                outcome
            }));
            wait_until(|| coordinator.waiter_count() == position + 1).await;
        }

        // Nobody resumes before the refresh resolves
        tokio::task::yield_now().await;
        assert!(resumed.lock().is_empty());

        gate.add_permits(1);
        for waiter in waiters {
            // Waiters observe the leader's outcome, not their own closure
            assert_eq!(waiter.await.unwrap(), RefreshOutcome::Refreshed);
        }
        leader.await.unwrap();

        assert_eq!(*resumed.lock(), vec!["A", "B", "C"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_broadcast() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let gate = Arc::new(Semaphore::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let coordinator = Arc::clone(&coordinator);
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                coordinator
                    .run(move || gated_refresh(gate, calls, RefreshOutcome::Failed))
                    .await
            }));
        }

        wait_until(|| coordinator.waiter_count() == 2).await;
        gate.add_permits(1);

        for handle in handles {
            assert_eq!(handle.await.unwrap(), RefreshOutcome::Failed);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_cycles_each_refresh() {
        let coordinator = RefreshCoordinator::new();

        coordinator.run(|| async { RefreshOutcome::Refreshed }).await;
        coordinator.run(|| async { RefreshOutcome::Failed }).await;

        assert_eq!(coordinator.stats().cycles, 2);
    }

    #[tokio::test]
    async fn test_panicking_refresh_releases_waiters() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let gate = Arc::new(Semaphore::new(0));

        let leader = {
            let coordinator = Arc::clone(&coordinator);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                coordinator.run(move || exploding_refresh(gate)).await
            })
        };
        wait_until(|| coordinator.is_refreshing()).await;

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.run(|| async { RefreshOutcome::Refreshed }).await })
        };
        wait_until(|| coordinator.waiter_count() == 1).await;

        gate.add_permits(1);

        assert_eq!(leader.await.unwrap(), RefreshOutcome::Failed);
        assert_eq!(waiter.await.unwrap(), RefreshOutcome::Failed);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_failure_hook_runs_once_per_failed_cycle() {
        let coordinator = RefreshCoordinator::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counted = |hits: &Arc<AtomicUsize>| {
            let hits = Arc::clone(hits);
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        };

        coordinator
            .run_with_failure_hook(|| async { RefreshOutcome::Refreshed }, counted(&hits))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        coordinator
            .run_with_failure_hook(|| async { RefreshOutcome::Failed }, counted(&hits))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_hook_runs_on_panic_before_waiters_resume() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let gate = Arc::new(Semaphore::new(0));
        let hits = Arc::new(AtomicUsize::new(0));

        let leader = {
            let coordinator = Arc::clone(&coordinator);
            let gate = Arc::clone(&gate);
            let hits = Arc::clone(&hits);
            tokio::spawn(async move {
                coordinator
                    .run_with_failure_hook(move || exploding_refresh(gate), move || {
                        hits.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
            })
        };
        wait_until(|| coordinator.is_refreshing()).await;

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            let hits = Arc::clone(&hits);
            tokio::spawn(async move {
                let outcome = coordinator.run(|| async { RefreshOutcome::Refreshed }).await;
                (outcome, hits.load(Ordering::SeqCst))
            })
        };
        wait_until(|| coordinator.waiter_count() == 1).await;

        gate.add_permits(1);

        assert_eq!(leader.await.unwrap(), RefreshOutcome::Failed);
        assert_eq!(waiter.await.unwrap(), (RefreshOutcome::Failed, 1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_does_not_abort_refresh() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let gate = Arc::new(Semaphore::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let coordinator = Arc::clone(&coordinator);
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                coordinator
                    .run(move || gated_refresh(gate, calls, RefreshOutcome::Refreshed))
                    .await
            })
        };
        wait_until(|| coordinator.is_refreshing()).await;

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.run(|| async { RefreshOutcome::Failed }).await })
        };
        wait_until(|| coordinator.waiter_count() == 1).await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert!(coordinator.is_refreshing());

        gate.add_permits(1);
        assert_eq!(waiter.await.unwrap(), RefreshOutcome::Refreshed);
        assert!(!coordinator.is_refreshing());
    }
}
