//! Control surface of a resetable process: flags, status and execution
//! tracking shared between the scheduler loop and its managers.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::metrics;

/// Observable state of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    #[cfg_attr(feature = "serde", serde(rename = "initialized"))]
    Initialized,
    #[cfg_attr(feature = "serde", serde(rename = "resetting"))]
    Resetting,
    #[cfg_attr(feature = "serde", serde(rename = "starting execution"))]
    StartingExecution,
    #[cfg_attr(feature = "serde", serde(rename = "waiting"))]
    Waiting,
    #[cfg_attr(feature = "serde", serde(rename = "paused"))]
    Paused,
    #[cfg_attr(feature = "serde", serde(rename = "terminated"))]
    Terminated,
}

impl Status {
    /// The status string exposed to management tooling
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Initialized => "initialized",
            Status::Resetting => "resetting",
            Status::StartingExecution => "starting execution",
            Status::Waiting => "waiting",
            Status::Paused => "paused",
            Status::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a scheduler for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerSnapshot {
    pub name: String,
    pub status: Status,
    pub execution_count: usize,
    pub paused: bool,
    pub wait_time: Duration,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Flags {
    pub(crate) running: bool,
    pub(crate) pause: bool,
    pub(crate) reset: bool,
    pub(crate) wait_for_execution_to_finish: bool,
}

struct Control {
    name: String,
    flags: Mutex<Flags>,
    flags_changed: Notify,
    executions: Mutex<HashSet<Uuid>>,
    executions_changed: Notify,
    status: watch::Sender<Status>,
    wait_time_ms: AtomicU64,
}

/// Cloneable handle for managing a resetable process.
///
/// The scheduler passes its own handle to every `execute()` call so work can
/// be tracked with [`start_execution`](Self::start_execution) and
/// [`finish_execution`](Self::finish_execution); management code keeps a
/// clone to pause, reset or stop the loop and to read its status.
#[derive(Clone)]
pub struct ResetHandle {
    control: Arc<Control>,
}

impl ResetHandle {
    pub(crate) fn new(name: String, wait_time: Duration) -> Self {
        let (status, _) = watch::channel(Status::Initialized);
        Self {
            control: Arc::new(Control {
                name,
                flags: Mutex::new(Flags {
                    running: true,
                    pause: false,
                    reset: false,
                    wait_for_execution_to_finish: false,
                }),
                flags_changed: Notify::new(),
                executions: Mutex::new(HashSet::new()),
                executions_changed: Notify::new(),
                status,
                wait_time_ms: AtomicU64::new(saturating_millis(wait_time)),
            }),
        }
    }

    fn flags_mut(&self) -> MutexGuard<'_, Flags> {
        self.control
            .flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn executions(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.control
            .executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn update_flags(&self, f: impl FnOnce(&mut Flags)) {
        f(&mut self.flags_mut());
        self.control.flags_changed.notify_waiters();
    }

    pub(crate) fn flags(&self) -> Flags {
        *self.flags_mut()
    }

    /// Name of the process this handle controls
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Stop invoking `execute()` until [`resume`](Self::resume) is called.
    ///
    /// Executions already in flight are unaffected.
    pub fn pause(&self) {
        tracing::debug!(process = %self.control.name, "pause requested");
        self.update_flags(|flags| flags.pause = true);
    }

    /// Clear a previous [`pause`](Self::pause)
    pub fn resume(&self) {
        tracing::debug!(process = %self.control.name, "resume requested");
        self.update_flags(|flags| flags.pause = false);
    }

    /// Restart the cycle once every tracked execution has finished.
    pub fn soft_reset(&self) {
        tracing::debug!(process = %self.control.name, "soft reset requested");
        self.update_flags(|flags| {
            flags.wait_for_execution_to_finish = true;
            flags.pause = false;
            flags.reset = true;
        });
    }

    /// Restart the cycle immediately, abandoning tracked executions.
    pub fn hard_reset(&self) {
        tracing::debug!(process = %self.control.name, "hard reset requested");
        self.update_flags(|flags| {
            flags.wait_for_execution_to_finish = false;
            flags.pause = false;
            flags.reset = true;
        });
    }

    /// End the scheduler loop; its status becomes `terminated`.
    pub fn stop(&self) {
        tracing::debug!(process = %self.control.name, "stop requested");
        self.update_flags(|flags| flags.running = false);
    }

    /// Track a new in-flight execution and return its id
    pub fn start_execution(&self) -> Uuid {
        let id = Uuid::new_v4();
        let count = {
            let mut executions = self.executions();
            executions.insert(id);
            executions.len()
        };
        metrics::executions_in_flight(count);
        self.control.executions_changed.notify_waiters();
        id
    }

    /// Mark an execution finished.
    ///
    /// Returns `false` for an id that is not tracked, such as one started
    /// before a hard reset; such late completions are ignored.
    pub fn finish_execution(&self, id: Uuid) -> bool {
        let (removed, count) = {
            let mut executions = self.executions();
            (executions.remove(&id), executions.len())
        };
        if removed {
            metrics::executions_in_flight(count);
            self.control.executions_changed.notify_waiters();
        } else {
            tracing::debug!(process = %self.control.name, execution = %id, "ignoring completion of untracked execution");
        }
        removed
    }

    /// Number of executions currently tracked
    pub fn execution_count(&self) -> usize {
        self.executions().len()
    }

    /// Current scheduler status
    pub fn status(&self) -> Status {
        *self.control.status.borrow()
    }

    /// Watch status transitions
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.control.status.subscribe()
    }

    /// Whether the loop has not been stopped
    pub fn is_running(&self) -> bool {
        self.flags().running
    }

    /// Whether a pause is in effect
    pub fn is_paused(&self) -> bool {
        self.flags().pause
    }

    /// Back-off interval used when paused or when no work was available
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.control.wait_time_ms.load(Ordering::Relaxed))
    }

    /// Change the back-off interval
    pub fn set_wait_time(&self, wait_time: Duration) {
        self.control
            .wait_time_ms
            .store(saturating_millis(wait_time), Ordering::Relaxed);
    }

    /// Monitoring view of the scheduler
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            name: self.control.name.clone(),
            status: self.status(),
            execution_count: self.execution_count(),
            paused: self.is_paused(),
            wait_time: self.wait_time(),
        }
    }

    pub(crate) fn set_status(&self, status: Status) {
        let previous = self.control.status.send_replace(status);
        if previous != status {
            tracing::trace!(process = %self.control.name, %status, "status changed");
        }
    }

    /// Start of a reset cycle: forget every tracked execution.
    pub(crate) fn clear_executions(&self) {
        let abandoned = {
            let mut executions = self.executions();
            let abandoned = executions.len();
            executions.clear();
            abandoned
        };
        if abandoned > 0 {
            tracing::debug!(process = %self.control.name, abandoned, "cleared tracked executions");
        }
        metrics::executions_in_flight(0);
        self.control.executions_changed.notify_waiters();
    }

    pub(crate) fn clear_reset(&self) {
        self.flags_mut().reset = false;
    }

    /// Wait up to `wait_time`, returning early once the flags no longer
    /// call for this back-off.
    pub(crate) async fn back_off(&self, paused: bool) {
        // A deadline past the clock's range means wait for a flag change only.
        let deadline = Instant::now().checked_add(self.wait_time());
        loop {
            let notified = self.control.flags_changed.notified();
            let flags = self.flags();
            if !flags.running || flags.reset || flags.pause != paused {
                return;
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Wait for the tracked execution set to empty. A hard reset requested
    /// meanwhile abandons the wait.
    pub(crate) async fn drain(&self) {
        loop {
            let executions = self.control.executions_changed.notified();
            let flags = self.control.flags_changed.notified();
            if self.execution_count() == 0 || !self.flags().wait_for_execution_to_finish {
                return;
            }
            tokio::select! {
                _ = executions => {}
                _ = flags => {}
            }
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl fmt::Debug for ResetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetHandle")
            .field("name", &self.control.name)
            .field("status", &self.status())
            .field("flags", &self.flags())
            .field("execution_count", &self.execution_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ResetHandle {
        ResetHandle::new("test".to_string(), Duration::from_millis(100))
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(Status::Initialized.to_string(), "initialized");
        assert_eq!(Status::StartingExecution.as_str(), "starting execution");
        assert_eq!(Status::Terminated.to_string(), "terminated");
    }

    #[test]
    fn test_reset_flags() {
        let handle = handle();
        handle.pause();
        assert!(handle.is_paused());

        handle.soft_reset();
        let flags = handle.flags();
        assert!(flags.reset && flags.wait_for_execution_to_finish && !flags.pause);

        handle.pause();
        handle.hard_reset();
        let flags = handle.flags();
        assert!(flags.reset && !flags.wait_for_execution_to_finish && !flags.pause);
    }

    #[test]
    fn test_execution_tracking() {
        let handle = handle();
        let first = handle.start_execution();
        let second = handle.start_execution();
        assert_ne!(first, second);
        assert_eq!(handle.execution_count(), 2);

        assert!(handle.finish_execution(first));
        assert!(!handle.finish_execution(first));
        assert_eq!(handle.execution_count(), 1);

        handle.clear_executions();
        assert_eq!(handle.execution_count(), 0);
        assert!(!handle.finish_execution(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_off_wakes_on_flag_change() {
        let handle = handle();
        handle.set_wait_time(Duration::from_secs(3600));

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.back_off(false).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        handle.pause();
        tokio::time::timeout(Duration::from_millis(10), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_wait_time_saturates() {
        let handle = handle();
        handle.set_wait_time(Duration::MAX);
        assert_eq!(handle.wait_time(), Duration::from_millis(u64::MAX));

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.back_off(false).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        handle.stop();
        tokio::time::timeout(Duration::from_millis(10), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_off_times_out() {
        let handle = handle();
        let started = Instant::now();
        handle.back_off(false).await;
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_drain_waits_for_executions() {
        let handle = handle();
        handle.soft_reset();
        let id = handle.start_execution();

        let drained = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.drain().await })
        };
        tokio::task::yield_now().await;
        assert!(!drained.is_finished());

        handle.finish_execution(id);
        drained.await.unwrap();
        assert_eq!(handle.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_hard_reset_abandons_drain() {
        let handle = handle();
        handle.soft_reset();
        handle.start_execution();

        let drained = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.drain().await })
        };
        tokio::task::yield_now().await;

        handle.hard_reset();
        drained.await.unwrap();
        assert_eq!(handle.execution_count(), 1);
    }
}
