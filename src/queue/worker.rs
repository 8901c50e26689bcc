//! Pool workers.

use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

use super::{Dispatched, ProcessQueue, WorkerInfo};
use crate::error::Error;
use crate::metrics;
use crate::process::Process;

/// Unique identifier for workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// The part of a worker the queue can observe.
pub(crate) struct WorkerSlot {
    id: WorkerId,
    current: Mutex<Option<String>>,
}

impl WorkerSlot {
    fn current(&self) -> MutexGuard<'_, Option<String>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn set_current(&self, process: Option<String>) {
        *self.current() = process;
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.current().is_none()
    }

    pub(crate) fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            current_process: self.current().clone(),
        }
    }
}

/// Pulls processes off a queue's dispatch channel and runs them one at a
/// time.
///
/// A worker moves `idle → running → idle → … → retired`. It retires after
/// `max_worker_idle_time` without work and exits when the queue shuts down.
/// Failures of the processes it runs are logged and never end the worker.
pub struct ProcessQueueWorker {
    slot: Arc<WorkerSlot>,
    queue: ProcessQueue,
}

impl ProcessQueueWorker {
    pub(crate) fn new(id: WorkerId, queue: ProcessQueue) -> Self {
        Self {
            slot: Arc::new(WorkerSlot {
                id,
                current: Mutex::new(None),
            }),
            queue,
        }
    }

    /// This worker's id
    pub fn id(&self) -> WorkerId {
        self.slot.id
    }

    /// Name of the process currently running on this worker
    pub fn current_process(&self) -> Option<String> {
        self.slot.current().clone()
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll the dispatch channel until retired or the queue shuts down.
    pub async fn run(self) {
        self.queue.add_worker(self.slot.clone());
        let _registration = Registration {
            queue: &self.queue,
            id: self.slot.id,
        };
        let idle_time = self.queue.max_worker_idle_time();
        tracing::debug!(worker = %self.slot.id, "worker started");

        loop {
            match self.queue.dispatch().read_timeout(idle_time).await {
                Ok(Some(process)) => self.execute(process).await,
                Ok(None) => {
                    if self.queue.try_retire(self.slot.id) {
                        break;
                    }
                }
                Err(_) => {
                    tracing::debug!(worker = %self.slot.id, "dispatch channel closed");
                    break;
                }
            }
        }
    }

    async fn execute(&self, dispatched: Dispatched) {
        let Dispatched {
            mut process,
            ticket,
        } = dispatched;
        let name = process.name().to_string();
        self.queue.claim(&self.slot, &name, &ticket);
        tracing::debug!(worker = %self.slot.id, process = %name, "running process");

        let outcome = AssertUnwindSafe(process.run()).catch_unwind().await;
        self.slot.set_current(None);

        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(payload) => Error::panicked(&name, payload),
        };
        match error {
            Error::Shutdown => {
                tracing::trace!(process = %name, "process cancelled");
            }
            Error::ChannelClosed => {
                tracing::debug!(process = %name, "process ended on closed channel");
            }
            error => {
                tracing::error!(process = %name, worker = %self.slot.id, error = %error, "process failed");
                metrics::process_failed();
            }
        }
    }
}

/// Deregisters the worker on every exit path.
struct Registration<'a> {
    queue: &'a ProcessQueue,
    id: WorkerId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.queue.remove_worker(self.id);
    }
}

impl fmt::Debug for ProcessQueueWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessQueueWorker")
            .field("id", &self.slot.id)
            .field("current_process", &self.current_process())
            .finish()
    }
}
