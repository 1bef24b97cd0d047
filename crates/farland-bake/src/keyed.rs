//! Per-key serial task executor.
//!
//! Tasks submitted under the same key run one at a time in submission order;
//! tasks under different keys run in parallel on a fixed pool of worker
//! threads.
//!
//! Every key with outstanding work owns a FIFO queue in a [`DashMap`]. A key
//! sits in the shared ready channel at most once: it is enqueued when its queue
//! is created and re-enqueued by the worker that just ran one of its tasks if
//! more work arrived meanwhile. The queue stays registered while its task runs,
//! which is what keeps a second worker from picking up the same key.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, error, warn};

use crate::error::PipelineError;

/// A unit of work run by the executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Queues are shared between workers, so each task sits behind a lock that
/// makes it `Sync`. Only the worker that pops a task ever takes it.
type QueuedTask = Mutex<Task>;

struct Shared<K> {
    queues: DashMap<K, VecDeque<QueuedTask>>,
    ready: Sender<K>,
    stopped: AtomicBool,
}

/// Cloneable submission handle for a [`KeyedExecutor`].
pub struct ExecutorHandle<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for ExecutorHandle<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> ExecutorHandle<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Queues `task` behind every task already queued or running for `key`.
    ///
    /// Returns `false` if the executor has shut down.
    pub fn submit(&self, key: K, task: Task) -> bool {
        self.enqueue(key, task, false)
    }

    /// Discards every task still queued for `key`, then queues `task`.
    ///
    /// A task already running for `key` is not interrupted; `task` runs after
    /// it finishes. Returns `false` if the executor has shut down.
    pub fn submit_exclusive(&self, key: K, task: Task) -> bool {
        self.enqueue(key, task, true)
    }

    fn enqueue(&self, key: K, task: Task, exclusive: bool) -> bool {
        if self.shared.stopped.load(Ordering::Acquire) {
            warn!("Dropping task for {key:?}: executor is shut down");
            return false;
        }
        match self.shared.queues.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let queue = entry.get_mut();
                if exclusive && !queue.is_empty() {
                    debug!("Discarding {} queued tasks for {key:?}", queue.len());
                    queue.clear();
                }
                queue.push_back(Mutex::new(task));
            }
            Entry::Vacant(entry) => {
                entry.insert(VecDeque::from([Mutex::new(task)]));
                let _ = self.shared.ready.send(key);
            }
        }
        true
    }

    /// Discards every queued task. Running tasks finish normally.
    pub fn cancel_all(&self) -> usize {
        let mut discarded = 0;
        for mut entry in self.shared.queues.iter_mut() {
            discarded += entry.value().len();
            entry.value_mut().clear();
        }
        discarded
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queues.iter().map(|entry| entry.value().len()).sum()
    }

    /// Returns `true` if no key has queued or running work.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.queues.is_empty()
    }
}

/// Worker pool running tasks with per-key mutual exclusion and FIFO order.
pub struct KeyedExecutor<K> {
    handle: ExecutorHandle<K>,
    /// Dropping this sender tells every worker to exit.
    shutdown_tx: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl<K> KeyedExecutor<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Spawns `threads` workers named `{name}-{index}`.
    pub fn new(name: &str, threads: usize) -> Result<Self, PipelineError> {
        let (ready_tx, ready_rx) = unbounded::<K>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let shared = Arc::new(Shared {
            queues: DashMap::new(),
            ready: ready_tx,
            stopped: AtomicBool::new(false),
        });

        let mut executor = Self {
            handle: ExecutorHandle {
                shared: Arc::clone(&shared),
            },
            shutdown_tx: Some(shutdown_tx),
            workers: Vec::with_capacity(threads),
        };

        for index in 0..threads.max(1) {
            let shared = Arc::clone(&shared);
            let ready = ready_rx.clone();
            let shutdown = shutdown_rx.clone();
            let worker = std::thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&shared, &ready, &shutdown))
                .map_err(PipelineError::Spawn)?;
            executor.workers.push(worker);
        }

        debug!("Started {} '{name}' workers", executor.workers.len());
        Ok(executor)
    }

    /// A cloneable handle for submitting work from other owners.
    #[must_use]
    pub fn handle(&self) -> ExecutorHandle<K> {
        self.handle.clone()
    }

    /// See [`ExecutorHandle::submit`].
    pub fn submit(&self, key: K, task: Task) -> bool {
        self.handle.submit(key, task)
    }

    /// See [`ExecutorHandle::submit_exclusive`].
    pub fn submit_exclusive(&self, key: K, task: Task) -> bool {
        self.handle.submit_exclusive(key, task)
    }

    /// See [`ExecutorHandle::cancel_all`].
    pub fn cancel_all(&self) -> usize {
        self.handle.cancel_all()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.handle.is_idle()
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting work, waits for running tasks and joins all workers.
    ///
    /// Tasks still queued are discarded.
    pub fn shutdown(&mut self) {
        if self.shutdown_tx.is_none() {
            return;
        }
        self.handle.shared.stopped.store(true, Ordering::Release);
        self.shutdown_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let discarded = self.handle.cancel_all();
        self.handle.shared.queues.clear();
        debug!("Executor shut down, discarded {discarded} queued tasks");
    }
}

impl<K> Drop for KeyedExecutor<K> {
    fn drop(&mut self) {
        if self.shutdown_tx.take().is_some() {
            self.handle.shared.stopped.store(true, Ordering::Release);
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
        }
    }
}

fn worker_loop<K>(shared: &Shared<K>, ready: &Receiver<K>, shutdown: &Receiver<()>)
where
    K: Eq + Hash + Clone + Debug,
{
    loop {
        let next = select! {
            recv(shutdown) -> _ => None,
            recv(ready) -> key => key.ok(),
        };
        let Some(key) = next else {
            break;
        };

        let task = match shared.queues.entry(key.clone()) {
            Entry::Occupied(mut entry) => match entry.get_mut().pop_front() {
                Some(task) => task.into_inner().unwrap_or_else(PoisonError::into_inner),
                None => {
                    // Cancelled while waiting in the ready channel.
                    entry.remove();
                    continue;
                }
            },
            Entry::Vacant(_) => continue,
        };

        if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
            error!("Task for {key:?} panicked: {}", panic_message(&*panic));
        }

        if let Entry::Occupied(entry) = shared.queues.entry(key.clone()) {
            if entry.get().is_empty() {
                entry.remove();
            } else {
                let _ = shared.ready.send(key);
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use super::*;

    fn wait_idle<K>(executor: &KeyedExecutor<K>)
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    {
        let start = Instant::now();
        while !executor.is_idle() {
            assert!(start.elapsed().as_secs() < 5, "Timed out waiting for executor");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_same_key_runs_in_submission_order() {
        let executor = KeyedExecutor::new("test-order", 4).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let log = Arc::clone(&log);
            executor.submit(
                7u32,
                Box::new(move || {
                    if i % 10 == 0 {
                        std::thread::sleep(Duration::from_millis(2));
                    }
                    log.lock().unwrap().push(i);
                }),
            );
        }
        wait_idle(&executor);
        assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_slow_first_task_still_finishes_first() {
        let executor = KeyedExecutor::new("test-slow", 4).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&log);
        executor.submit(
            "k",
            Box::new(move || {
                std::thread::sleep(Duration::from_millis(50));
                first.lock().unwrap().push("j1");
            }),
        );
        let second = Arc::clone(&log);
        executor.submit("k", Box::new(move || second.lock().unwrap().push("j2")));

        wait_idle(&executor);
        assert_eq!(*log.lock().unwrap(), vec!["j1", "j2"]);
    }

    #[test]
    fn test_same_key_never_runs_concurrently() {
        let executor = KeyedExecutor::new("test-exclusive", 8).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let running = Arc::clone(&running);
            let overlaps = Arc::clone(&overlaps);
            executor.submit(
                1u8,
                Box::new(move || {
                    if running.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_micros(200));
                    running.fetch_sub(1, Ordering::SeqCst);
                }),
            );
        }
        wait_idle(&executor);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_distinct_keys_run_in_parallel() {
        let executor = KeyedExecutor::new("test-parallel", 2).unwrap();
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let done = Arc::new(AtomicUsize::new(0));

        for key in 0..2u32 {
            let barrier = Arc::clone(&barrier);
            let done = Arc::clone(&done);
            executor.submit(
                key,
                Box::new(move || {
                    // Deadlocks unless both keys run at the same time.
                    barrier.wait();
                    done.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        wait_idle(&executor);
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_exclusive_discards_queued_but_not_running() {
        let executor = KeyedExecutor::new("test-barrier", 2).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

        let running = Arc::clone(&log);
        executor.submit(
            0u32,
            Box::new(move || {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                running.lock().unwrap().push("running");
            }),
        );
        started_rx.recv().unwrap();

        for _ in 0..3 {
            let queued = Arc::clone(&log);
            executor.submit(0, Box::new(move || queued.lock().unwrap().push("queued")));
        }
        let barrier = Arc::clone(&log);
        executor.submit_exclusive(0, Box::new(move || barrier.lock().unwrap().push("barrier")));
        release_tx.send(()).unwrap();

        wait_idle(&executor);
        assert_eq!(*log.lock().unwrap(), vec!["running", "barrier"]);
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let executor = KeyedExecutor::new("test-panic", 1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let explode = true;
        executor.submit(
            0u32,
            Box::new(move || {
                if explode {
                    panic!("bake exploded");
                }
            }),
        );
        let after = Arc::clone(&ran);
        executor.submit(
            0,
            Box::new(move || {
                after.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let other = Arc::clone(&ran);
        executor.submit(
            1,
            Box::new(move || {
                other.fetch_add(1, Ordering::SeqCst);
            }),
        );

        wait_idle(&executor);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_all_drops_queued_tasks() {
        let executor = KeyedExecutor::new("test-cancel", 1).unwrap();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let ran = Arc::new(AtomicUsize::new(0));

        executor.submit(
            0u32,
            Box::new(move || {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            }),
        );
        started_rx.recv().unwrap();
        for key in 0..4 {
            let ran = Arc::clone(&ran);
            executor.submit(
                key,
                Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert_eq!(executor.handle().queued(), 4);
        assert_eq!(executor.cancel_all(), 4);
        release_tx.send(()).unwrap();

        wait_idle(&executor);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let mut executor = KeyedExecutor::new("test-shutdown", 2).unwrap();
        assert_eq!(executor.worker_count(), 2);
        executor.shutdown();
        assert!(!executor.submit(0u32, Box::new(|| {})));
        assert!(executor.is_idle());
    }

    #[test]
    fn test_tasks_need_not_be_sync() {
        let executor = KeyedExecutor::new("test-send-only", 1).unwrap();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let hits = Cell::new(0u32);
        assert!(executor.submit(
            0u32,
            Box::new(move || {
                hits.set(hits.get() + 1);
                done_tx.send(hits.get()).unwrap();
            }),
        ));
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(1));
    }
}
