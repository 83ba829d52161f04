//! FIFO concurrency limiter for one resource class.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

struct PoolState {
    active: usize,
    queue: VecDeque<oneshot::Sender<()>>,
}

/// Runs at most `capacity` submitted futures at once. Work submitted while
/// the pool is full waits in an unbounded queue and starts in submission
/// order as slots free up. A slot is released when its task settles, whether
/// it returned, panicked, or was aborted.
#[derive(Clone)]
pub struct BoundedPool {
    name: &'static str,
    capacity: usize,
    state: Arc<Mutex<PoolState>>,
}

impl BoundedPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            state: Arc::new(Mutex::new(PoolState {
                active: 0,
                queue: VecDeque::new(),
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Spawn `fut` under the pool's limit. Admission is decided before this
    /// returns, so submission order is start order.
    pub fn submit<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut admission = self.admit();
        tokio::spawn(async move {
            admission.acquired().await;
            fut.await
        })
    }

    fn admit(&self) -> Admission {
        let mut state = self.state.lock();
        let pending = if state.active < self.capacity {
            state.active += 1;
            None
        } else {
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(tx);
            trace!(pool = self.name, queued = state.queue.len(), "pool full, task queued");
            Some(rx)
        };
        Admission {
            state: Arc::clone(&self.state),
            pending,
        }
    }
}

/// Hand the slot to the oldest live waiter, or free it.
fn release(state: &mut PoolState) {
    while let Some(next) = state.queue.pop_front() {
        if next.send(()).is_ok() {
            return;
        }
    }
    state.active -= 1;
}

/// A task's claim on a pool slot, held for the task's whole lifetime.
struct Admission {
    state: Arc<Mutex<PoolState>>,
    pending: Option<oneshot::Receiver<()>>,
}

impl Admission {
    async fn acquired(&mut self) {
        if let Some(rx) = self.pending.as_mut() {
            // The sender lives in the pool queue until it is signalled.
            let _ = rx.await;
            self.pending = None;
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(mut rx) = self.pending.take() {
            // Dropped while queued. Senders fire under this lock, so either
            // the slot was already handed over or it never will be.
            if rx.try_recv().is_err() {
                return;
            }
        }
        release(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_immediately_below_capacity() {
        let pool = BoundedPool::new("test", 3);
        let handles: Vec<_> = (0..3).map(|i| pool.submit(async move { i * 2 })).collect();
        assert_eq!(pool.active(), 3);
        assert_eq!(pool.queued(), 0);

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert_eq!(results, vec![0, 2, 4]);
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn queued_tasks_start_in_submission_order() {
        let pool = BoundedPool::new("images", 2);
        let starts = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let starts = starts.clone();
                let active = active.clone();
                let peak = peak.clone();
                pool.submit(async move {
                    starts.lock().push(i);
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        assert_eq!(pool.active(), 2);
        assert_eq!(pool.queued(), 3);

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*starts.lock(), vec![0, 1, 2, 3, 4]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn panicking_task_releases_its_slot() {
        let pool = BoundedPool::new("test", 1);
        let bad = pool.submit(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            panic!("job blew up");
        });
        let good = pool.submit(async { "ran" });

        assert!(bad.await.unwrap_err().is_panic());
        assert_eq!(good.await.unwrap(), "ran");
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn aborted_waiter_is_skipped() {
        let pool = BoundedPool::new("test", 1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let first = pool.submit(async move {
            let _ = release_rx.await;
        });
        let skipped = pool.submit(async { "skipped" });
        let third = pool.submit(async { "third" });
        assert_eq!(pool.queued(), 2);

        skipped.abort();
        let _ = skipped.await;
        release_tx.send(()).unwrap();
        first.await.unwrap();

        assert_eq!(third.await.unwrap(), "third");
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(BoundedPool::new("test", 0).capacity(), 1);
    }
}
