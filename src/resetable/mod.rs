//! A supervisory scheduler loop with pause, soft reset and hard reset.
//!
//! [`ResetableProcess`] repeatedly invokes a user supplied [`Execute`] step.
//! A step that did work (`Ok(true)`) is followed immediately by the next one;
//! a step that found nothing to do (`Ok(false)`) or a pause makes the loop
//! back off for `wait_time`, waking early when the loop is paused, resumed,
//! reset or stopped.
//!
//! The loop moves through the statuses
//! `initialized → resetting → starting execution → {waiting | paused} → …`
//! and ends in `terminated`, either because it was stopped or because a step
//! returned an error. A terminated loop is never restarted automatically.
//!
//! ## Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use pipewright::prelude::*;
//! use std::time::Duration;
//!
//! struct Poller {
//!     polls: usize,
//! }
//!
//! #[async_trait]
//! impl Execute for Poller {
//!     async fn execute(&mut self, handle: &ResetHandle) -> Result<bool> {
//!         let id = handle.start_execution();
//!         self.polls += 1;
//!         handle.finish_execution(id);
//!         if self.polls == 3 {
//!             handle.stop();
//!         }
//!         Ok(true)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut process = ResetableProcess::new("poller", Poller { polls: 0 })
//!         .wait_time(Duration::from_millis(10));
//!     let handle = process.handle();
//!     process.run().await?;
//!     assert_eq!(handle.status(), Status::Terminated);
//!     Ok(())
//! }
//! ```

mod control;

pub use control::{ResetHandle, SchedulerSnapshot, Status};

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::process::Process;

/// One step of work driven by a [`ResetableProcess`].
#[async_trait]
pub trait Execute: Send {
    /// Perform one unit of work.
    ///
    /// Return `Ok(true)` when work was done so the next step runs at once,
    /// `Ok(false)` when nothing was available. Errors end the scheduler
    /// permanently, so routine failures must be handled here.
    async fn execute(&mut self, handle: &ResetHandle) -> Result<bool>;

    /// Reinitialize internal state at the start of every reset cycle.
    async fn reset(&mut self, _handle: &ResetHandle) -> Result<()> {
        Ok(())
    }
}

/// Configuration for a [`ResetableProcess`]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerConfig {
    /// Back-off interval when paused or when no work was available
    pub wait_time: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_millis(1000),
        }
    }
}

impl SchedulerConfig {
    /// Set the back-off interval
    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }
}

/// Runs an [`Execute`] step in a loop until stopped.
pub struct ResetableProcess<E> {
    executor: E,
    handle: ResetHandle,
}

impl<E: Execute> ResetableProcess<E> {
    /// Create a scheduler with the default configuration
    pub fn new(name: impl Into<String>, executor: E) -> Self {
        Self::with_config(name, executor, SchedulerConfig::default())
    }

    /// Create a scheduler with an explicit configuration
    pub fn with_config(name: impl Into<String>, executor: E, config: SchedulerConfig) -> Self {
        Self {
            executor,
            handle: ResetHandle::new(name.into(), config.wait_time),
        }
    }

    /// Set the back-off interval
    pub fn wait_time(self, wait_time: Duration) -> Self {
        self.handle.set_wait_time(wait_time);
        self
    }

    /// A handle for managing this scheduler from elsewhere
    pub fn handle(&self) -> ResetHandle {
        self.handle.clone()
    }

    /// The wrapped executor
    pub fn executor(&self) -> &E {
        &self.executor
    }

    async fn schedule(&mut self) -> Result<()> {
        let handle = self.handle.clone();
        let _terminated = TerminateOnExit(&handle);
        tracing::debug!(process = %handle.name(), "scheduler started");

        while handle.is_running() {
            handle.set_status(Status::Resetting);
            handle.clear_executions();
            self.executor.reset(&handle).await?;
            handle.clear_reset();

            loop {
                let flags = handle.flags();
                if !flags.running || flags.reset {
                    break;
                }
                handle.set_status(Status::StartingExecution);

                let back_off = if flags.pause {
                    Some(Status::Paused)
                } else if !self.executor.execute(&handle).await? {
                    Some(Status::Waiting)
                } else {
                    None
                };

                if let Some(status) = back_off {
                    handle.set_status(status);
                    handle.back_off(status == Status::Paused).await;
                }
            }

            if handle.flags().wait_for_execution_to_finish {
                handle.drain().await;
            }
        }

        tracing::debug!(process = %handle.name(), "scheduler stopped");
        Ok(())
    }
}

#[async_trait]
impl<E: Execute> Process for ResetableProcess<E> {
    fn name(&self) -> &str {
        self.handle.name()
    }

    async fn run(&mut self) -> Result<()> {
        let result = self.schedule().await;
        if let Err(error) = &result {
            tracing::error!(process = %self.handle.name(), %error, "scheduler terminated by failure");
        }
        result
    }
}

/// Marks the scheduler terminated on every exit path, including panics and
/// dropped futures.
struct TerminateOnExit<'a>(&'a ResetHandle);

impl Drop for TerminateOnExit<'_> {
    fn drop(&mut self) {
        self.0.set_status(Status::Terminated);
    }
}

impl<E> std::fmt::Debug for ResetableProcess<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetableProcess")
            .field("handle", &self.handle)
            .finish()
    }
}
