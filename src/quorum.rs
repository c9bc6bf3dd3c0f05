//! Asynchronous fan-out with partial-success aggregation.
//!
//! A [`QuorumOp`] runs `total` labelled peer requests concurrently and
//! resolves as soon as `quorum` of them have succeeded, folding every
//! successful response into a merged result. It fails fast once so many
//! requests have failed that the quorum can no longer be reached.
//!
//! The merged result and the success/failure counters live in a single
//! immutable status that is replaced with compare-and-swap, so completions
//! racing on different worker threads never lose an update. Waiters block
//! on a semaphore: each success adds one permit and the fail-fast path adds
//! `quorum` permits at once.

use crate::error::{Error, Result};
use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

type MergeFn<R, T> = Box<dyn Fn(&R, &T) -> R + Send + Sync>;
type FailureHandler = Box<dyn Fn(&str, Option<&Error>) + Send + Sync>;

/// A peer request that has not been started yet.
pub struct PendingOp<T> {
    peer: String,
    future: BoxFuture<'static, Result<T>>,
}

impl<T> PendingOp<T> {
    pub fn new<F>(peer: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            peer: peer.into(),
            future: Box::pin(future),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

struct Status<R> {
    result: R,
    success: usize,
    fail: usize,
}

pub struct QuorumOp<R, T> {
    quorum: usize,
    total: usize,
    status: ArcSwap<Status<R>>,
    merge: MergeFn<R, T>,
    on_failure: Option<FailureHandler>,
    permits: Semaphore,
    attached: AtomicBool,
    cancel: CancellationToken,
}

impl<R, T> QuorumOp<R, T>
where
    R: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    /// `seed` is the initial merged value every success is folded into.
    pub fn new<F>(quorum: usize, total: usize, seed: R, merge: F) -> Result<Self>
    where
        F: Fn(&R, &T) -> R + Send + Sync + 'static,
    {
        if quorum > total {
            return Err(Error::InvalidQuorum { quorum, total });
        }

        Ok(Self {
            quorum,
            total,
            status: ArcSwap::from_pointee(Status {
                result: seed,
                success: 0,
                fail: 0,
            }),
            merge: Box::new(merge),
            on_failure: None,
            permits: Semaphore::new(0),
            attached: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    /// Called once per failed request. `cause` is `None` when the request
    /// was cancelled rather than errored.
    pub fn on_peer_failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, Option<&Error>) + Send + Sync + 'static,
    {
        self.on_failure = Some(Box::new(handler));
        self
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Starts every pending request. Must be called exactly once with
    /// exactly `total` requests.
    pub fn attach(self: &Arc<Self>, ops: Vec<PendingOp<T>>) -> Result<()> {
        if ops.len() != self.total {
            return Err(Error::OperationCount {
                expected: self.total,
                actual: ops.len(),
            });
        }
        if self
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyAttached);
        }

        for op in ops {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let PendingOp { peer, future } = op;
                tokio::select! {
                    biased;
                    _ = this.cancel.cancelled() => this.complete_failure(&peer, None),
                    res = future => match res {
                        Ok(value) => this.complete_success(&peer, &value),
                        Err(e) => this.complete_failure(&peer, Some(&e)),
                    },
                }
            });
        }
        Ok(())
    }

    fn complete_success(&self, peer: &str, value: &T) {
        loop {
            let current = self.status.load_full();
            let next = Status {
                result: (self.merge)(&current.result, value),
                success: current.success + 1,
                fail: current.fail,
            };
            let success = next.success;
            let prev = self.status.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*prev, &current) {
                trace!("Peer {} succeeded ({}/{})", peer, success, self.quorum);
                self.permits.add_permits(1);
                return;
            }
        }
    }

    fn complete_failure(&self, peer: &str, cause: Option<&Error>) {
        if let Some(handler) = &self.on_failure {
            handler(peer, cause);
        }

        let tolerated = self.total - self.quorum;
        loop {
            let current = self.status.load_full();
            let fail = current.fail + 1;
            let next = Status {
                result: current.result.clone(),
                success: current.success,
                fail,
            };
            let prev = self.status.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*prev, &current) {
                if fail > tolerated && current.fail <= tolerated {
                    debug!(
                        "Quorum {}/{} unreachable after {} failures",
                        self.quorum, self.total, fail
                    );
                    self.permits.add_permits(self.quorum);
                }
                return;
            }
        }
    }

    /// Waits until quorum is reached or proven unreachable.
    pub async fn wait(&self) -> Result<R> {
        let _ = self.permits.acquire_many(self.required_permits()).await;
        self.extract()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning the
    /// merged result only if quorum was reached by then.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<R> {
        let acquired =
            tokio::time::timeout(timeout, self.permits.acquire_many(self.required_permits()))
                .await;
        if acquired.is_err() {
            debug!("Quorum wait timed out after {:?}", timeout);
        }
        self.extract()
    }

    /// Cancels every outstanding request and wakes all waiters.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            trace!("Cancelling quorum operation");
        }
        self.cancel.cancel();
        self.permits.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current `(success, fail)` counts.
    pub fn progress(&self) -> (usize, usize) {
        let status = self.status.load();
        (status.success, status.fail)
    }

    fn required_permits(&self) -> u32 {
        u32::try_from(self.quorum).unwrap_or(u32::MAX)
    }

    fn extract(&self) -> Result<R> {
        let status = self.status.load();
        if status.success < self.quorum {
            if self.cancel.is_cancelled() {
                return Err(Error::OperationCancelled);
            }
            return Err(Error::QuorumNotReached {
                reached: status.success,
                required: self.quorum,
            });
        }
        Ok(status.result.clone())
    }
}
