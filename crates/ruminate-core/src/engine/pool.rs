//! Bounded evaluator pool
//!
//! Fixed worker threads behind a bounded queue. Tasks are pure (draft
//! evaluations); when the queue is full the submitting thread runs the task
//! itself, so backpressure never errors and never drops work. Results land
//! in fixed slots, keeping the merge order-independent of scheduling.

use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool with caller-runs backpressure
pub struct EvalPool {
    tx: Option<SyncSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl EvalPool {
    /// Spawn `parallelism` workers behind a queue of `queue_cap` slots
    pub fn new(parallelism: usize, queue_cap: usize, shutdown_timeout: Duration) -> Self {
        let parallelism = parallelism.max(1);
        let (tx, rx) = std::sync::mpsc::sync_channel::<Job>(queue_cap.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..parallelism)
            .map(|i| {
                let rx = Arc::clone(&rx);
                std::thread::Builder::new()
                    .name(format!("eval-pool-{i}"))
                    .spawn(move || Self::worker_loop(&rx))
                    .expect("spawning evaluator worker")
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
            shutdown_timeout,
        }
    }

    fn worker_loop(rx: &Mutex<Receiver<Job>>) {
        loop {
            let job = {
                let guard = rx.lock().unwrap_or_else(|e| e.into_inner());
                guard.recv()
            };
            match job {
                Ok(job) => job(),
                Err(_) => break, // queue closed
            }
        }
    }

    /// Submit a task; runs it on the calling thread if the queue is full
    pub fn execute(&self, job: Job) {
        let Some(tx) = &self.tx else {
            job();
            return;
        };
        match tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => job(),
        }
    }

    /// Run one closure per item and collect results in item order
    ///
    /// The closure must be pure with respect to pool state; results are
    /// written to fixed indices so scheduling cannot reorder them.
    pub fn map_ordered<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(usize) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let (result_tx, result_rx) = std::sync::mpsc::channel::<(usize, T)>();

        for i in 0..n {
            let f = Arc::clone(&f);
            let result_tx = result_tx.clone();
            self.execute(Box::new(move || {
                // a closed result channel means the caller gave up; drop quietly
                let _ = result_tx.send((i, f(i)));
            }));
        }
        drop(result_tx);

        let mut slots: Vec<Option<T>> = (0..n).map(|_| None).collect();
        for (i, value) in result_rx {
            slots[i] = Some(value);
        }
        slots.into_iter().map(|s| s.expect("worker completed")).collect()
    }

    /// Number of worker threads
    pub fn parallelism(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for EvalPool {
    fn drop(&mut self) {
        // closing the channel lets workers drain and exit
        self.tx.take();
        let deadline = Instant::now() + self.shutdown_timeout;
        for worker in self.workers.drain(..) {
            while !worker.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                tracing::warn!("evaluator worker outlived shutdown timeout, detaching");
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool() -> EvalPool {
        EvalPool::new(2, 4, Duration::from_millis(500))
    }

    #[test]
    fn test_map_ordered_preserves_order() {
        let results = pool().map_ordered(16, |i| i * 10);
        assert_eq!(results, (0..16).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_backpressure_runs_on_caller() {
        // a tiny queue with slow tasks forces the caller-runs path; every
        // task must still execute exactly once
        let pool = EvalPool::new(1, 1, Duration::from_millis(500));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            pool.execute(Box::new(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        drop(pool); // join workers
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_zero_parallelism_clamped() {
        let pool = EvalPool::new(0, 0, Duration::from_millis(100));
        assert_eq!(pool.parallelism(), 1);
        assert_eq!(pool.map_ordered(3, |i| i), vec![0, 1, 2]);
    }
}
