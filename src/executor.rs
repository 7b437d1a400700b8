use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, error, warn};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::errors::{Result, TxError};

/// A unit of work submitted to the pool or the scheduler.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Stand-in for deadlines that do not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `delay` from now, saturating to a far-future instant when `delay` is too
/// large to represent.
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

struct PoolShared {
    /// Workers parked on the queue that no submitter has claimed yet.
    idle: AtomicUsize,
    live: AtomicUsize,
    spawned: AtomicU64,
    keep_alive: Duration,
    thread_name: String,
}

/// A cached thread pool.
///
/// A submitted job goes to an idle worker when there is one and to a freshly
/// spawned worker otherwise, so a job never queues behind long-blocking
/// jobs. Workers idle for longer than the keep-alive exit.
pub struct WorkerPool {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(thread_name: impl Into<String>, keep_alive: Duration) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        Self {
            sender,
            receiver,
            shared: Arc::new(PoolShared {
                idle: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                spawned: AtomicU64::new(0),
                keep_alive,
                thread_name: thread_name.into(),
            }),
        }
    }

    /// Runs `job` on a pool thread.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::Other`] if no worker thread could be spawned.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        let claimed = self
            .shared
            .idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();

        if claimed {
            return self
                .sender
                .send(job)
                .map_err(|_| TxError::Other("worker pool queue closed".to_string()));
        }

        self.spawn_worker(job)
    }

    /// Number of live worker threads.
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    fn spawn_worker(&self, first: Job) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let receiver = self.receiver.clone();
        let index = shared.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", shared.thread_name, index);

        shared.live.fetch_add(1, Ordering::AcqRel);
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(first, receiver, shared));

        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                self.shared.live.fetch_sub(1, Ordering::AcqRel);
                Err(TxError::Other(format!("failed to spawn pool worker: {}", e)))
            }
        }
    }
}

fn worker_loop(first: Job, receiver: Receiver<Job>, shared: Arc<PoolShared>) {
    run_job(first);
    loop {
        shared.idle.fetch_add(1, Ordering::AcqRel);
        let next = match receiver.recv_timeout(shared.keep_alive) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => {
                let retired = shared
                    .idle
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                    .is_ok();
                if retired {
                    break;
                }
                // A submitter claimed this worker between the timeout and the retire attempt.
                match receiver.recv() {
                    Ok(job) => job,
                    Err(_) => break,
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        run_job(next);
    }
    shared.live.fetch_sub(1, Ordering::AcqRel);
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(
            "Job panicked on {}",
            thread::current().name().unwrap_or("unnamed worker")
        );
    }
}

/// Cancellation handle for a job submitted with [`Scheduler::schedule`].
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledJob {
    /// Prevents the job from running if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

enum SchedulerCommand {
    Schedule {
        at: Instant,
        job: Job,
        cancelled: Arc<AtomicBool>,
    },
    Shutdown,
}

struct Entry {
    at: Instant,
    seq: u64,
    job: Job,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.seq) == (other.at, other.seq)
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

/// One-shot delayed job runner backed by a single timer thread.
///
/// Jobs run on the timer thread itself and should stay short.
pub struct Scheduler {
    sender: Sender<SchedulerCommand>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Starts the timer thread.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::Other`] if the thread cannot be spawned.
    pub fn new(thread_name: impl Into<String>) -> Result<Self> {
        let (sender, receiver) = unbounded::<SchedulerCommand>();
        let handle = thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || timer_loop(receiver))
            .map_err(|e| TxError::Other(format!("failed to spawn scheduler thread: {}", e)))?;

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    /// Runs `job` once, `delay` from now, unless cancelled first.
    pub fn schedule<F>(&self, delay: Duration, job: F) -> ScheduledJob
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let command = SchedulerCommand::Schedule {
            at: deadline_after(delay),
            job: Box::new(job),
            cancelled: Arc::clone(&cancelled),
        };
        if self.sender.send(command).is_err() {
            warn!("Scheduler is shut down, delayed job dropped");
            cancelled.store(true, Ordering::Release);
        }
        ScheduledJob { cancelled }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.sender.send(SchedulerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn timer_loop(receiver: Receiver<SchedulerCommand>) {
    let mut queue: BinaryHeap<Reverse<Entry>> = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        let now = Instant::now();
        while queue.peek().is_some_and(|Reverse(entry)| entry.at <= now) {
            if let Some(Reverse(entry)) = queue.pop() {
                if entry.cancelled.load(Ordering::Acquire) {
                    continue;
                }
                run_job(entry.job);
            }
        }

        let command = match queue.peek() {
            Some(Reverse(entry)) => {
                let wait = entry.at.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(wait) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            SchedulerCommand::Schedule { at, job, cancelled } => {
                queue.push(Reverse(Entry {
                    at,
                    seq,
                    job,
                    cancelled,
                }));
                seq += 1;
            }
            SchedulerCommand::Shutdown => {
                debug!("Scheduler shutting down with {} pending jobs", queue.len());
                break;
            }
        }
    }
}
