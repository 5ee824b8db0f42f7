use super::{
    config::Config,
    errors::{JobError, StartError, SubmitError},
    job::{Job, WorkItem},
    model::{Lifecycle, PoolMetrics},
    queue::{Dequeued, Queue},
};
use parking_lot::Mutex;
use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// State shared between the pool handle and its worker threads.
struct Shared {
    queue: Queue,
    running: CancellationToken,
    poll_interval: Duration,
    live_workers: AtomicUsize,
    busy_workers: AtomicUsize,
    total_submitted: AtomicUsize,
    completed_tasks: AtomicUsize,
    failed_tasks: AtomicUsize,
    next_id: AtomicU64,
    // First id handed out after `stop` began; `u64::MAX` while running.
    stop_cutoff: AtomicU64,
    dropped_tasks: AtomicUsize,
}

impl Shared {
    fn submitted_after_stop(&self, item: &WorkItem) -> bool {
        self.running.is_cancelled() && item.id() >= self.stop_cutoff.load(Ordering::Acquire)
    }

    fn drop_item(&self, worker: usize, item: WorkItem) {
        debug!(worker, job_id = item.id(), job = item.label(), "dropping work item submitted during shutdown");
        drop(item);
        self.dropped_tasks.fetch_add(1, Ordering::Relaxed);
        self.queue.task_done();
    }

    fn run_item(&self, worker: usize, item: WorkItem) {
        self.busy_workers.fetch_add(1, Ordering::Relaxed);
        let id = item.id();
        let label = item.label().to_owned();
        trace!(worker, job_id = id, job = %label, "running work item");

        match item.run() {
            Ok(()) => {
                self.completed_tasks.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.failed_tasks.fetch_add(1, Ordering::Relaxed);
                error!(worker, job_id = id, job = %label, error = %err, "work item failed");
            }
        }

        self.busy_workers.fetch_sub(1, Ordering::Relaxed);
        self.queue.task_done();
    }
}

struct LiveWorker<'a>(&'a AtomicUsize);

impl Drop for LiveWorker<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn worker_loop(index: usize, shared: Arc<Shared>) {
    let _live = LiveWorker(&shared.live_workers);
    trace!(worker = index, "worker started");

    // Runs until the queue is closed and empty, so everything submitted
    // before `stop` is executed.
    loop {
        let item = match shared.queue.dequeue(shared.poll_interval) {
            Dequeued::Item(item) => item,
            Dequeued::Empty => continue,
            Dequeued::Closed => break,
        };
        if shared.submitted_after_stop(&item) {
            // Anything still queued raced `stop` as well; it sweeps them.
            shared.drop_item(index, item);
            break;
        }
        shared.run_item(index, item);
    }

    trace!(worker = index, "worker stopped");
}

/// Fixed-size pool of worker threads executing fire-and-forget jobs.
///
/// Producers call [`DispatchPool::submit`] from any thread and return
/// immediately. Each job runs exactly once on one worker; a job that fails or
/// panics is logged and dropped without affecting the worker or the
/// submitter.
///
/// [`DispatchPool::stop`] must be the last call on a pool. Called from inside
/// a job, for instance by dropping the last handle there, it does not wait
/// for the calling worker, which exits once its job returns.
pub struct DispatchPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    lifecycle: AtomicU8,
    rejected_tasks: AtomicUsize,
    workers: usize,
}

impl DispatchPool {
    /// Starts a pool of `workers` threads with otherwise default settings.
    pub fn new(workers: usize) -> Result<Self, StartError> {
        Self::start(Config::default().with_workers(workers))
    }

    pub fn start(config: Config) -> Result<Self, StartError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            queue: Queue::new(config.capacity, config.overflow),
            running: CancellationToken::new(),
            poll_interval: config.poll_interval,
            live_workers: AtomicUsize::new(0),
            busy_workers: AtomicUsize::new(0),
            total_submitted: AtomicUsize::new(0),
            completed_tasks: AtomicUsize::new(0),
            failed_tasks: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            stop_cutoff: AtomicU64::new(u64::MAX),
            dropped_tasks: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let worker_shared = Arc::clone(&shared);
            shared.live_workers.fetch_add(1, Ordering::AcqRel);

            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_prefix))
                .spawn(move || worker_loop(index, worker_shared));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    shared.live_workers.fetch_sub(1, Ordering::AcqRel);
                    shared.running.cancel();
                    shared.queue.close();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(StartError::Spawn { index, source });
                }
            }
        }

        info!(
            workers = config.workers,
            capacity = ?config.capacity,
            overflow = %config.overflow,
            "dispatch pool started"
        );

        Ok(Self {
            shared,
            handles: Mutex::new(handles),
            lifecycle: AtomicU8::new(Lifecycle::Running as u8),
            rejected_tasks: AtomicUsize::new(0),
            workers: config.workers,
        })
    }

    /// Queues `job` for execution on some worker.
    ///
    /// A job accepted before [`DispatchPool::stop`] is called always runs. One
    /// submitted while the pool is stopping may be dropped, in which case it is
    /// counted as rejected if the drop happened before this returned. Once [`DispatchPool::stop`] has completed every
    /// submission is rejected with [`SubmitError::Stopped`].
    pub fn submit<J: Job>(&self, job: J) -> Result<(), SubmitError> {
        let label = job.label();
        self.enqueue(label, Box::new(job))
    }

    /// Queues a closure under an explicit log label.
    pub fn submit_fn<F, E>(&self, label: impl Into<Cow<'static, str>>, f: F) -> Result<(), SubmitError>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<JobError>,
    {
        self.enqueue(label.into(), Box::new(f))
    }

    fn enqueue(&self, label: Cow<'static, str>, job: Box<dyn Job>) -> Result<(), SubmitError> {
        if self.lifecycle() == Lifecycle::Stopped {
            self.rejected_tasks.fetch_add(1, Ordering::Relaxed);
            debug!(job = %label, "rejected submission to stopped pool");
            return Err(SubmitError::Stopped);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        match self.shared.queue.enqueue(WorkItem::new(id, label, job)) {
            Ok(()) => {
                self.shared.total_submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                debug!(job_id = id, error = %err, "rejected submission");
                Err(err)
            }
        }
    }

    /// Blocks until the queue is empty and every dequeued job has finished.
    ///
    /// Jobs submitted by other threads while this waits may or may not be
    /// covered.
    pub fn drain(&self) {
        self.shared.queue.join();
    }

    /// Bounded [`DispatchPool::drain`]. Returns `false` if work was still
    /// outstanding when `timeout` elapsed.
    pub fn drain_timeout(&self, timeout: Duration) -> bool {
        self.shared.queue.join_timeout(timeout)
    }

    /// Stops the pool and waits for every worker thread to exit.
    ///
    /// Every job submitted before this call runs to completion first. Jobs
    /// submitted concurrently with it may be dropped; the count is reported in
    /// a warning. Only the first call has any effect.
    pub fn stop(&self) {
        if self
            .lifecycle
            .compare_exchange(
                Lifecycle::Running as u8,
                Lifecycle::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!(state = ?self.lifecycle(), "dispatch pool stop requested more than once");
            return;
        }

        debug!(workers = self.workers, "stopping dispatch pool");
        let cutoff = self.shared.next_id.load(Ordering::SeqCst);
        self.shared.stop_cutoff.store(cutoff, Ordering::Release);
        self.shared.running.cancel();
        self.shared.queue.close();

        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.handles.lock());
        for (index, handle) in handles.into_iter().enumerate() {
            if handle.thread().id() == current {
                debug!(worker = index, "stop called from a job, not waiting for its own worker");
                continue;
            }
            if handle.join().is_err() {
                error!(worker = index, "worker thread panicked outside a job");
            }
        }

        self.lifecycle.store(Lifecycle::Stopped as u8, Ordering::Release);

        let dropped =
            self.shared.queue.discard_remaining() + self.shared.dropped_tasks.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "work items submitted during shutdown were never run");
        }

        info!(
            completed = self.shared.completed_tasks.load(Ordering::Relaxed),
            failed = self.shared.failed_tasks.load(Ordering::Relaxed),
            "dispatch pool stopped"
        );
    }

    #[inline]
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Worker threads that have not exited yet.
    #[inline]
    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::Acquire)
    }

    /// Token cancelled when the pool begins shutting down. Async consumers
    /// can `.cancelled().await` on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.running.child_token()
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            workers: self.live_workers(),
            busy_workers: self.shared.busy_workers.load(Ordering::Relaxed),
            queued_tasks: self.shared.queue.len(),
            total_submitted: self.shared.total_submitted.load(Ordering::Relaxed),
            completed_tasks: self.shared.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.shared.failed_tasks.load(Ordering::Relaxed),
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
