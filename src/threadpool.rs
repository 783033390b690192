//! Worker thread pool and job dispatch.
//!
//! [`ThreadPool`] runs boxed jobs on a fixed set of named OS threads fed by a
//! crossbeam channel. [`JobDispatcher`] sits in front of it and applies the
//! serialization mode: `Serial` jobs run in the caller's thread, `Concurrent`
//! jobs go to the pool.

use crate::basetypes::SerializationMode;
use crate::error::{Result, TaurusError};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

// =============================================================================
// ThreadPool
// =============================================================================

/// Fixed-size pool of worker threads.
pub struct ThreadPool {
    name: String,
    size: usize,
    sender: Mutex<Option<Sender<Message>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawn `size` workers named `<name>-<n>`. A `queue_size` of 0 means an
    /// unbounded queue; otherwise submitting blocks while the queue is full.
    pub fn new(name: &str, size: usize, queue_size: usize) -> Result<Self> {
        let (tx, rx) = if queue_size == 0 {
            unbounded()
        } else {
            bounded(queue_size)
        };

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = rx.clone();
            let worker_name = format!("{}-{}", name, i);
            let handle = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || {
                    while let Ok(msg) = rx.recv() {
                        match msg {
                            Message::Run(job) => {
                                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                    tracing::error!(worker = %worker_name, "Job panicked");
                                }
                            }
                            Message::Stop => break,
                        }
                    }
                })?;
            workers.push(handle);
        }

        tracing::debug!(pool = %name, size, queue_size, "Thread pool started");
        Ok(Self {
            name: name.to_string(),
            size,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs waiting in the queue.
    pub fn qsize(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, Sender::len)
    }

    /// Whether [`join`](Self::join) has been called.
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Queue a job.
    pub fn add(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| TaurusError::PoolClosed(self.name.clone()))?;
        sender
            .send(Message::Run(Box::new(job)))
            .map_err(|_| TaurusError::PoolClosed(self.name.clone()))
    }

    /// Queue a job and hand its result to `callback` on the worker.
    pub fn add_with_callback<R, F, C>(&self, job: F, callback: C) -> Result<()>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        self.add(move || callback(job()))
    }

    /// Let queued jobs drain, then stop and join every worker.
    ///
    /// One stop message is queued per worker behind pending jobs. Joining
    /// twice is a no-op.
    pub fn join(&self) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        for _ in 0..self.size {
            if sender.send(Message::Stop).is_err() {
                break;
            }
        }
        drop(sender);

        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!(pool = %self.name, "Worker terminated abnormally");
            }
        }
        tracing::debug!(pool = %self.name, "Thread pool joined");
    }
}

// =============================================================================
// JobDispatcher
// =============================================================================

/// Applies the serialization mode to jobs.
pub struct JobDispatcher {
    pool: RwLock<Option<Arc<ThreadPool>>>,
    mode: RwLock<SerializationMode>,
}

impl JobDispatcher {
    /// Dispatcher without a pool; concurrent jobs are dropped with a log line.
    pub fn new(mode: SerializationMode) -> Self {
        Self {
            pool: RwLock::new(None),
            mode: RwLock::new(mode),
        }
    }

    /// Dispatcher backed by `pool`.
    pub fn with_pool(pool: ThreadPool, mode: SerializationMode) -> Self {
        Self {
            pool: RwLock::new(Some(Arc::new(pool))),
            mode: RwLock::new(mode),
        }
    }

    /// Install `pool`, joining any previous one.
    pub fn attach(&self, pool: ThreadPool) {
        let previous = self.pool.write().replace(Arc::new(pool));
        if let Some(previous) = previous {
            previous.join();
        }
    }

    /// Dispatcher that runs everything inline.
    pub fn serial() -> Self {
        Self::new(SerializationMode::Serial)
    }

    /// Default mode.
    pub fn mode(&self) -> SerializationMode {
        *self.mode.read()
    }

    /// Change the default mode.
    pub fn set_mode(&self, mode: SerializationMode) {
        *self.mode.write() = mode;
    }

    /// The pool, while it is running.
    pub fn pool(&self) -> Option<Arc<ThreadPool>> {
        self.pool.read().clone()
    }

    /// Run `job` according to `mode` (or the default mode).
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static, mode: Option<SerializationMode>) {
        match mode.unwrap_or_else(|| self.mode()) {
            SerializationMode::Serial => job(),
            SerializationMode::Concurrent => match self.pool() {
                Some(pool) => {
                    if let Err(e) = pool.add(job) {
                        tracing::info!(error = %e, "Job not run");
                    }
                }
                None => tracing::info!("Job not run: thread pool is not available"),
            },
        }
    }

    /// Run `job` and pass its result to `callback`.
    pub fn enqueue_with_callback<R, F, C>(&self, job: F, callback: C, mode: Option<SerializationMode>)
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        self.enqueue(move || callback(job()), mode);
    }

    /// Detach and join the pool.
    pub fn shutdown(&self) {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn jobs_run_and_join_drains_queue() {
        let pool = ThreadPool::new("test", 2, 10).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let c = Arc::clone(&count);
            pool.add(move || {
                thread::sleep(Duration::from_millis(1));
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.join();
        assert_eq!(count.load(Ordering::SeqCst), 20);
        assert!(pool.is_closed());
        assert!(matches!(pool.add(|| {}), Err(TaurusError::PoolClosed(_))));
        pool.join();
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let pool = ThreadPool::new("panics", 1, 0).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        pool.add(|| panic!("boom")).unwrap();
        let d = Arc::clone(&done);
        pool.add(move || {
            d.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_receives_result() {
        let pool = ThreadPool::new("cb", 1, 4).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.add_with_callback(|| 6 * 7, move |r| tx.send(r).unwrap())
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
        pool.join();
    }

    #[test]
    fn serial_dispatch_runs_inline() {
        let dispatcher = JobDispatcher::serial();
        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let r = Arc::clone(&ran_on);
        dispatcher.enqueue(move || *r.lock() = Some(thread::current().id()), None);
        assert_eq!(*ran_on.lock(), Some(caller));
    }

    #[test]
    fn concurrent_dispatch_uses_pool() {
        let pool = ThreadPool::new("dispatch", 1, 4).unwrap();
        let dispatcher = JobDispatcher::with_pool(pool, SerializationMode::Concurrent);
        let (tx, rx) = crossbeam_channel::bounded(1);
        dispatcher.enqueue_with_callback(
            || thread::current().name().map(str::to_string),
            move |n| tx.send(n).unwrap(),
            None,
        );
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("dispatch-0"));
        dispatcher.shutdown();
        assert!(dispatcher.pool().is_none());
    }
}
