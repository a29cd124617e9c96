//! An async I/O job pool built on top of [`crate::thread_pool`]'s
//! channel-based worker pool, adding a future-like handle for jobs that
//! produce a value (sequential reads submitted ahead of when their
//! result is needed, background compaction flushes, and so on).

use std::sync::mpsc;

use crate::thread_pool::{DropJoinThreadPool, ThreadPool};

/// A pool of background worker threads for I/O-bound jobs, joined
/// gracefully on drop.
pub struct IoThreadPool {
    inner: DropJoinThreadPool,
}

/// A handle to a job submitted to an [`IoThreadPool`]; call [`Self::join`]
/// to block until the job completes and retrieve its result.
pub struct IoFuture<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> IoFuture<T> {
    /// Block until the job completes, returning its result. Panics if
    /// the worker thread panicked while running the job.
    pub fn join(self) -> T {
        self.receiver.recv().expect("io worker panicked before producing a result")
    }
}

impl IoThreadPool {
    pub fn new(num_threads: usize) -> crate::error::Result<Self> {
        let inner = DropJoinThreadPool::new(num_threads)
            .map_err(|e| crate::error::PosDbError::StringError(e.to_string()))?;
        Ok(IoThreadPool { inner })
    }

    /// Fire-and-forget: run `job` on a worker thread, ignoring its result.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.spawn(job);
    }

    /// Submit `job` to run on a worker thread, returning a handle that
    /// can be joined later for its result.
    pub fn submit<F, T>(&self, job: F) -> IoFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.inner.spawn(move || {
            let _ = tx.send(job());
        });
        IoFuture { receiver: rx }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn submitted_jobs_run_and_join() {
        let pool = IoThreadPool::new(4).unwrap();
        let futures: Vec<_> = (0..20).map(|i| pool.submit(move || i * 2)).collect();
        let results: Vec<i32> = futures.into_iter().map(IoFuture::join).collect();
        assert_eq!(results, (0..20).map(|i| i * 2).collect::<Vec<_>>());
    }
}
