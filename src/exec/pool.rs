//! A fixed-size worker pool executor.
//!
//! Units are queued FIFO and picked up by a fixed set of named worker
//! threads. Workers drain the queue before honoring a shutdown request, so
//! a graceful [`shutdown`](ThreadPool::shutdown) runs everything that was
//! accepted. [`shutdown_now`](ThreadPool::shutdown_now) instead discards
//! the queue and cancels the discarded units' handles with a shutdown
//! reason; units already on a worker still run to completion — worker
//! threads are never killed mid-unit.

use crate::exec::{Executor, SubmitHandle, WorkUnit};
use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

struct PoolInner {
    name: String,
    queue: Mutex<VecDeque<(WorkUnit, SubmitHandle)>>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// Fixed-size worker pool implementing [`Executor`].
///
/// Dropping the pool performs a graceful shutdown. Neither shutdown flavor
/// may be called from inside one of the pool's own units: both join the
/// worker threads, and a worker cannot join itself.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawns `workers` named threads (at least one) ready to run units.
    pub fn new(name: impl Into<String>, workers: usize) -> io::Result<Self> {
        let name = name.into();
        let inner = Arc::new(PoolInner {
            name: name.clone(),
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let count = workers.max(1);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("{name}-worker-{index}"))
                .spawn(move || worker_loop(&inner))?;
            handles.push(handle);
        }
        tracing::debug!(pool = %name, workers = count, "worker pool started");
        Ok(Self {
            inner,
            workers: Mutex::new(handles),
        })
    }

    /// The pool's name, used as the worker thread name prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of units waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// True once either shutdown flavor has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Runs every queued unit, then stops and joins the workers.
    ///
    /// Idempotent; later calls find nothing left to join.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.available.notify_all();
        self.join_workers();
    }

    /// Discards the queue, cancels the discarded handles, then stops.
    ///
    /// Units already running on a worker are not affected.
    pub fn shutdown_now(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let abandoned: Vec<_> = {
            let mut queue = self.inner.queue.lock();
            let abandoned = queue.drain(..).collect();
            self.inner.available.notify_all();
            abandoned
        };
        if !abandoned.is_empty() {
            tracing::debug!(
                pool = %self.inner.name,
                count = abandoned.len(),
                "queued units discarded at shutdown"
            );
        }
        for (_unit, handle) in abandoned {
            handle.cancel_shutdown();
        }
        self.join_workers();
    }

    fn join_workers(&self) {
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                // Instrumented units never unwind, so this is a wrapper bug.
                tracing::error!(pool = %self.inner.name, "worker thread panicked");
            }
        }
    }
}

impl Executor for ThreadPool {
    fn submit(&self, unit: WorkUnit) -> Option<SubmitHandle> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            tracing::warn!(pool = %self.inner.name, "submit rejected: pool is shut down");
            return None;
        }
        let (unit, handle) = SubmitHandle::instrument(unit);
        {
            let mut queue = self.inner.queue.lock();
            // Re-checked under the queue lock: shutdown drains and joins
            // under it, so a push landing after the drain would strand the
            // handle in a pool with no workers left to settle it.
            if self.inner.shutdown.load(Ordering::Acquire) {
                drop(queue);
                tracing::warn!(pool = %self.inner.name, "submit rejected: pool is shut down");
                return None;
            }
            queue.push_back((unit, handle.clone()));
            self.inner.available.notify_one();
        }
        Some(handle)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.inner.name)
            .field("queued", &self.queued())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let next = {
            let mut queue = inner.queue.lock();
            loop {
                // Pop before checking shutdown so accepted units drain.
                if let Some(entry) = queue.pop_front() {
                    break Some(entry);
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                inner.available.wait(&mut queue);
            }
        };
        match next {
            Some((unit, _handle)) => unit(),
            None => break,
        }
    }
    tracing::trace!(pool = %inner.name, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CellError;
    use crate::test_utils::init_test_logging;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn units_run_and_handles_settle() {
        init_test_logging();
        let pool = ThreadPool::new("runner", 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            let handle = pool
                .submit(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .expect("pool accepts units");
            handles.push(handle);
        }
        for handle in handles {
            handle.wait().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn graceful_shutdown_drains_accepted_units() {
        init_test_logging();
        let pool = ThreadPool::new("drain", 1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        // One slow unit at the head keeps the rest queued.
        pool.submit(Box::new(|| thread::sleep(Duration::from_millis(40))));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 5, "queued units ran before exit");
        assert!(pool.is_shutdown());
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        init_test_logging();
        let pool = ThreadPool::new("closed", 1).unwrap();
        pool.shutdown();
        let handle = pool.submit(Box::new(|| {}));
        assert!(handle.is_none());
    }

    #[test]
    fn shutdown_now_cancels_queued_handles() {
        init_test_logging();
        let pool = ThreadPool::new("abort", 1).unwrap();
        let started = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(Barrier::new(2));
        {
            let started = Arc::clone(&started);
            let gate = Arc::clone(&gate);
            pool.submit(Box::new(move || {
                started.store(true, Ordering::SeqCst);
                gate.wait();
            }));
        }
        // Wait until the single worker actually holds the blocking unit, so
        // the next submit is guaranteed to sit in the queue.
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(2));
        }
        let queued = pool
            .submit(Box::new(|| {}))
            .expect("still accepting before shutdown");

        let releaser = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait())
        };
        pool.shutdown_now();
        releaser.join().unwrap();

        let err = queued.wait().unwrap_err();
        assert!(matches!(err, CellError::Cancelled(ref r) if r.is_shutdown()));
    }

    #[test]
    fn panicking_unit_does_not_kill_the_worker() {
        init_test_logging();
        let pool = ThreadPool::new("sturdy", 1).unwrap();
        let bad = pool.submit(Box::new(|| panic!("unit fell over"))).unwrap();
        assert!(bad.wait().is_err());

        // Same single worker must still be alive for the next unit.
        let ran = Arc::new(AtomicUsize::new(0));
        let good = {
            let ran = Arc::clone(&ran);
            pool.submit(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap()
        };
        good.wait().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_submit_from_a_unit() {
        init_test_logging();
        let pool = Arc::new(ThreadPool::new("reentrant", 2).unwrap());
        let ran = Arc::new(AtomicUsize::new(0));
        let outer = {
            let inner_pool = Arc::clone(&pool);
            let ran = Arc::clone(&ran);
            pool.submit(Box::new(move || {
                let ran = Arc::clone(&ran);
                if let Some(inner) = inner_pool.submit(Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })) {
                    inner.wait().unwrap();
                }
            }))
        }
        .expect("outer accepted");
        outer.wait().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
