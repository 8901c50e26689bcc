//! A bounded pool of workers executing queued processes.
//!
//! Producers [`enqueue`](ProcessQueue::enqueue) processes onto a shared
//! dispatch channel. The pool grows on demand, one worker at a time, up to
//! `max_workers`; a worker that sees no work for `max_worker_idle_time`
//! retires itself.
//!
//! ## Example
//!
//! ```rust
//! use pipewright::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let queue = ProcessQueue::new(
//!         QueueConfig::default()
//!             .max_workers(2)
//!             .max_worker_idle_time(Duration::from_millis(50)),
//!     );
//!
//!     queue
//!         .enqueue(process_from_fn("hello", || async {
//!             println!("hello from a worker");
//!             Ok(())
//!         }))
//!         .await?;
//!
//!     queue.shutdown();
//!     Ok(())
//! }
//! ```

mod worker;

pub use worker::{ProcessQueueWorker, WorkerId};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::metrics;
use crate::process::Process;

use worker::WorkerSlot;

/// Configuration for a [`ProcessQueue`]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueConfig {
    /// Upper bound on the number of live workers
    pub max_workers: usize,
    /// How long an idle worker waits for work before retiring
    pub max_worker_idle_time: Duration,
    /// Capacity of the dispatch channel; `0` hands processes off directly
    pub dispatch_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            max_worker_idle_time: Duration::from_secs(60),
            dispatch_capacity: 0,
        }
    }
}

impl QueueConfig {
    /// Set the maximum number of workers
    pub fn max_workers(mut self, max: usize) -> Self {
        self.max_workers = max.max(1);
        self
    }

    /// Set the idle time after which a worker retires
    pub fn max_worker_idle_time(mut self, idle: Duration) -> Self {
        self.max_worker_idle_time = idle;
        self
    }

    /// Set the dispatch channel capacity
    pub fn dispatch_capacity(mut self, capacity: usize) -> Self {
        self.dispatch_capacity = capacity;
        self
    }
}

/// Observable state of one worker
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkerInfo {
    pub id: WorkerId,
    /// Name of the process being run, `None` while idle
    pub current_process: Option<String>,
}

/// Point-in-time view of a queue for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueSnapshot {
    pub workers: usize,
    pub busy_workers: usize,
    pub max_workers: usize,
    pub pending_processes: usize,
    pub closed: bool,
}

#[derive(Default)]
struct WorkerSet {
    live: HashMap<WorkerId, Arc<WorkerSlot>>,
    /// Spawned workers that have not registered yet
    starting: usize,
    /// Processes being handed off or buffered that no worker has claimed yet
    pending: usize,
}

impl WorkerSet {
    fn idle(&self) -> usize {
        self.live.values().filter(|slot| slot.is_idle()).count() + self.starting
    }

    /// Reserve a new worker when pending processes outnumber idle workers.
    fn reserve_worker(&mut self, max_workers: usize) -> bool {
        let total = self.live.len() + self.starting;
        let grow = self.idle() < self.pending && total < max_workers;
        if grow {
            self.starting += 1;
        }
        grow
    }
}

/// Marks one handed-off process as no longer pending. Settled exactly once,
/// by the worker that claims it or by a handoff that gave up on it.
#[derive(Clone, Default)]
pub(crate) struct Ticket(Arc<AtomicBool>);

impl Ticket {
    /// Returns `true` for the single caller that settles the ticket.
    fn settle(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// A process travelling through the dispatch channel
pub(crate) struct Dispatched {
    pub(crate) process: Box<dyn Process>,
    pub(crate) ticket: Ticket,
}

pub(crate) struct QueueInner {
    config: QueueConfig,
    dispatch: Channel<Dispatched>,
    workers: Mutex<WorkerSet>,
    next_worker_id: AtomicU64,
}

impl QueueInner {
    fn workers(&self) -> MutexGuard<'_, WorkerSet> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the dispatch channel and the live worker set.
#[derive(Clone)]
pub struct ProcessQueue {
    inner: Arc<QueueInner>,
}

impl ProcessQueue {
    /// Create a queue; no workers run until the first process is enqueued.
    pub fn new(config: QueueConfig) -> Self {
        let dispatch = Channel::new(config.dispatch_capacity);
        Self {
            inner: Arc::new(QueueInner {
                config,
                dispatch,
                workers: Mutex::new(WorkerSet::default()),
                next_worker_id: AtomicU64::new(0),
            }),
        }
    }

    /// Hand a process to the pool.
    ///
    /// Completes once a worker has taken the process (or, with a buffered
    /// dispatch channel, once it is queued). Fails with
    /// [`Error::ChannelClosed`] after [`shutdown`](Self::shutdown).
    pub async fn enqueue<P>(&self, process: P) -> Result<()>
    where
        P: Process + 'static,
    {
        self.enqueue_boxed(Box::new(process)).await
    }

    /// Hand an already boxed process to the pool
    pub async fn enqueue_boxed(&self, process: Box<dyn Process>) -> Result<()> {
        if self.inner.dispatch.is_closed() {
            return Err(Error::ChannelClosed);
        }
        let name = process.name().to_string();
        let mut handoff = Handoff::begin(self);
        let dispatched = Dispatched {
            process,
            ticket: handoff.ticket.clone(),
        };
        self.inner.dispatch.write(dispatched).await?;
        handoff.delivered = true;
        tracing::trace!(process = %name, "process dispatched");
        metrics::process_dispatched();
        Ok(())
    }

    /// Close the dispatch channel; workers exit once they finish their
    /// current process.
    pub fn shutdown(&self) {
        tracing::debug!("process queue shutting down");
        self.inner.dispatch.close();
    }

    /// Whether the queue has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.inner.dispatch.is_closed()
    }

    /// The configured idle timeout for workers
    pub fn max_worker_idle_time(&self) -> Duration {
        self.inner.config.max_worker_idle_time
    }

    /// The configuration this queue was built with
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Number of registered workers
    pub fn worker_count(&self) -> usize {
        self.inner.workers().live.len()
    }

    /// Snapshot of every registered worker, ordered by id
    pub fn workers(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<WorkerInfo> = self
            .inner
            .workers()
            .live
            .values()
            .map(|slot| slot.info())
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Monitoring view of the queue
    pub fn snapshot(&self) -> QueueSnapshot {
        let set = self.inner.workers();
        QueueSnapshot {
            workers: set.live.len(),
            busy_workers: set.live.values().filter(|slot| !slot.is_idle()).count(),
            max_workers: self.inner.config.max_workers,
            pending_processes: set.pending,
            closed: self.inner.dispatch.is_closed(),
        }
    }

    pub(crate) fn dispatch(&self) -> &Channel<Dispatched> {
        &self.inner.dispatch
    }

    /// Register a worker that is about to start polling.
    pub(crate) fn add_worker(&self, slot: Arc<WorkerSlot>) {
        let mut set = self.inner.workers();
        set.starting = set.starting.saturating_sub(1);
        set.live.insert(slot.id(), slot);
        tracing::debug!(workers = set.live.len(), "worker registered");
        metrics::workers(set.live.len());
    }

    /// Deregister a worker
    pub(crate) fn remove_worker(&self, id: WorkerId) {
        let mut set = self.inner.workers();
        if set.live.remove(&id).is_some() {
            tracing::debug!(worker = %id, workers = set.live.len(), "worker deregistered");
            metrics::workers(set.live.len());
        }
    }

    /// Mark a worker busy with a process it just took off the dispatch
    /// channel. If other processes are still waiting for an idle worker the
    /// pool grows so they are not stuck behind this one.
    pub(crate) fn claim(&self, slot: &WorkerSlot, process: &str, ticket: &Ticket) {
        let grow = {
            let mut set = self.inner.workers();
            if ticket.settle() {
                set.pending -= 1;
            }
            slot.set_current(Some(process.to_string()));
            set.reserve_worker(self.inner.config.max_workers)
        };
        if grow {
            self.spawn_worker();
        }
    }

    /// Deregister an idle worker unless a process is waiting to be claimed.
    pub(crate) fn try_retire(&self, id: WorkerId) -> bool {
        let mut set = self.inner.workers();
        if set.pending > 0 {
            return false;
        }
        set.live.remove(&id);
        tracing::debug!(worker = %id, workers = set.live.len(), "idle worker retired");
        metrics::workers(set.live.len());
        metrics::worker_retired();
        true
    }

    fn spawn_worker(&self) {
        let id = WorkerId(self.inner.next_worker_id.fetch_add(1, Ordering::Relaxed));
        ProcessQueueWorker::new(id, self.clone()).spawn();
    }
}

impl Default for ProcessQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl std::fmt::Debug for ProcessQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessQueue")
            .field("config", &self.inner.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Counts a process as pending while it is handed off, growing the pool when
/// no idle worker is available to take it. A delivered process stays pending
/// until the worker that takes it calls [`ProcessQueue::claim`]; an abandoned
/// handoff settles its ticket itself unless a worker already claimed it.
struct Handoff<'a> {
    queue: &'a ProcessQueue,
    ticket: Ticket,
    delivered: bool,
}

impl<'a> Handoff<'a> {
    fn begin(queue: &'a ProcessQueue) -> Self {
        let grow = {
            let mut set = queue.inner.workers();
            set.pending += 1;
            set.reserve_worker(queue.inner.config.max_workers)
        };
        if grow {
            queue.spawn_worker();
        }
        Self {
            queue,
            ticket: Ticket::default(),
            delivered: false,
        }
    }
}

impl Drop for Handoff<'_> {
    fn drop(&mut self) {
        if self.delivered {
            return;
        }
        let mut set = self.queue.inner.workers();
        if self.ticket.settle() {
            set.pending -= 1;
        }
    }
}
