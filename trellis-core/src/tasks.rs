//! Bounded-concurrency background tasks.
//!
//! Every matched request hands a [`TaskId`] to the [`TaskPool`]. The task
//! waits in its own spawned future for one of `capacity` slots, works for a
//! fixed duration, then gives the slot back. A single cancellation token is
//! shared by all tasks: once it fires, waiting tasks give up without running
//! and running tasks stop early.
//!
//! ```
//! use std::time::Duration;
//! use trellis_core::tasks::{TaskIdGenerator, TaskOutcome, TaskPool};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = TaskPool::new(2, Duration::from_millis(10));
//! let ids = TaskIdGenerator::new();
//!
//! let handle = pool.spawn(ids.next_id());
//! assert_eq!(handle.await.unwrap(), TaskOutcome::Completed);
//! # }
//! ```

use crate::logging::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Identifier of one background task, `task-<n>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// Produces strictly increasing nanosecond-based task identifiers.
///
/// The wall clock is read once; afterwards time advances with the monotonic
/// clock, so clock adjustments cannot produce duplicates. Two calls in the
/// same nanosecond still get distinct values.
#[derive(Debug)]
pub struct TaskIdGenerator {
    origin_nanos: u64,
    started: Instant,
    last: AtomicU64,
}

impl TaskIdGenerator {
    pub fn new() -> Self {
        let origin_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self {
            origin_nanos,
            started: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    /// Next timestamp value, never equal to or below a previous one
    pub fn next_value(&self) -> u64 {
        let now = self
            .origin_nanos
            .saturating_add(self.started.elapsed().as_nanos() as u64);
        let advance = |prev: u64| prev.saturating_add(1).max(now);

        // the closure always returns Some, so this is always Ok
        match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| Some(advance(prev)))
        {
            Ok(prev) | Err(prev) => advance(prev),
        }
    }

    pub fn next_id(&self) -> TaskId {
        TaskId(format!("task-{}", self.next_value()))
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// How a background task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Worked for the full duration
    Completed,
    /// Held a slot when shutdown began
    Cancelled,
    /// Shutdown began before a slot was obtained
    NotStarted,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStats {
    pub capacity: usize,
    /// Tasks holding a slot right now
    pub running: usize,
    /// Highest `running` ever observed
    pub peak: usize,
    /// Tasks waiting for a slot
    pub waiting: usize,
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub not_started: u64,
}

/// Decrements its gauge when dropped
struct GaugeGuard<'a>(&'a AtomicUsize);

impl<'a> GaugeGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A held slot. Dropping it returns the permit and lowers the running gauge,
/// on every exit path including abort.
struct Slot<'a> {
    _running: GaugeGuard<'a>,
    _permit: OwnedSemaphorePermit,
}

/// Executor bounding how many background tasks run at once
pub struct TaskPool {
    capacity: usize,
    duration: Duration,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    running: AtomicUsize,
    peak: AtomicUsize,
    waiting: AtomicUsize,
    started: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    not_started: AtomicU64,
}

impl TaskPool {
    /// Create a pool of `capacity` slots whose tasks each work for `duration`.
    ///
    /// A capacity of 0 is raised to 1.
    pub fn new(capacity: usize, duration: Duration) -> Arc<Self> {
        let capacity = capacity.max(1);
        info!(capacity, duration = ?duration, "Task pool initialized");

        Arc::new(Self {
            capacity,
            duration,
            semaphore: Arc::new(Semaphore::new(capacity)),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            not_started: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `id` in the background; the caller never waits for it
    pub fn spawn(self: &Arc<Self>, id: TaskId) -> JoinHandle<TaskOutcome> {
        let pool = Arc::clone(self);
        self.tracker.spawn(async move { pool.run(id).await })
    }

    /// Acquire a slot, work, release. Runs inside the spawned task.
    pub async fn run(&self, id: TaskId) -> TaskOutcome {
        let permit = {
            let _waiting = GaugeGuard::enter(&self.waiting);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
            }
        };

        // a permit won in the same instant as cancellation is handed back unused
        let permit = match permit {
            Some(permit) if !self.cancel.is_cancelled() => permit,
            _ => {
                self.not_started.fetch_add(1, Ordering::Relaxed);
                info!(task_id = %id, "Task {} not started due to shutdown", id);
                return TaskOutcome::NotStarted;
            }
        };

        let _slot = self.occupy(permit);
        info!(task_id = %id, "Starting background task: {}", id);

        tokio::select! {
            _ = tokio::time::sleep(self.duration) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                info!(task_id = %id, "Completed background task: {}", id);
                TaskOutcome::Completed
            }
            _ = self.cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                info!(task_id = %id, "Cancelled background task: {}", id);
                TaskOutcome::Cancelled
            }
        }
    }

    fn occupy(&self, permit: OwnedSemaphorePermit) -> Slot<'_> {
        let running = GaugeGuard::enter(&self.running);
        self.peak
            .fetch_max(self.running.load(Ordering::SeqCst), Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::Relaxed);
        Slot {
            _running: running,
            _permit: permit,
        }
    }

    /// Cancel every waiting and running task. Idempotent.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!(
                running = self.running.load(Ordering::SeqCst),
                waiting = self.waiting.load(Ordering::SeqCst),
                "Cancelling background tasks"
            );
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait up to `timeout` for every spawned task to finish.
    ///
    /// Returns whether the pool drained in time. Tasks spawned afterwards are
    /// still tracked.
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        self.tracker.reopen();

        if drained {
            debug!("Background tasks drained");
        } else {
            warn!(
                remaining = self.tracker.len(),
                timeout = ?timeout,
                "Background tasks still running after timeout"
            );
        }
        drained
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            capacity: self.capacity,
            running: self.running.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
            waiting: self.waiting.load(Ordering::SeqCst),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            not_started: self.not_started.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("capacity", &self.capacity)
            .field("duration", &self.duration)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
