//! Bounded worker pool for CPU-bound parse/normalize work
//!
//! Decouples CPU-bound parsing of large payloads from the I/O-bound fetch
//! loops: a slow network source never starves parsing of another source,
//! and parse work never floods the blocking-thread pool beyond the
//! configured width.

use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct ParsePool {
    semaphore: Arc<Semaphore>,
}

impl ParsePool {
    /// Pool bounded to `workers` concurrent parse tasks
    pub fn new(workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Run a CPU-bound closure on the blocking pool, bounded by the
    /// semaphore. Suspends cooperatively while the pool is full.
    pub async fn run<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("parse pool semaphore closed");
        tokio::task::spawn_blocking(f)
            .await
            .expect("parse task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_runs_closure_and_returns_value() {
        let pool = ParsePool::new(2);
        let result = pool.run(|| 21 * 2).await;
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_concurrency_bounded() {
        let pool = ParsePool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(30));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
