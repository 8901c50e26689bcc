//! Error types for the process runtime.

use std::sync::Arc;

/// The main error type for channels, processes and schedulers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The channel is closed: every writer disconnected or it was closed explicitly.
    ///
    /// Processes treat this as normal termination, not as a failure.
    #[error("channel is closed")]
    ChannelClosed,

    /// The surrounding runtime asked the current unit of work to stop.
    #[error("process was cancelled")]
    Shutdown,

    /// A process failed while running
    #[error("process `{name}` failed: {source}")]
    Process {
        name: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// A process panicked while running
    #[error("process `{name}` panicked: {message}")]
    Panicked { name: String, message: String },

    /// An operation timed out
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Wrap any error as a failure of the named process
    pub fn process<S, E>(name: S, error: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Process {
            name: name.into(),
            source: Arc::new(error),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Build a panic error from the payload returned by `catch_unwind`.
    pub(crate) fn panicked(name: &str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Error::Panicked {
            name: name.to_string(),
            message,
        }
    }

    /// Whether this is the closed-channel signal
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ChannelClosed)
    }

    /// Whether this is a cancellation signal
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Shutdown)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for attaching a process name to foreign errors
pub trait IntoProcessError<T> {
    fn into_process_error(self, name: &str) -> Result<T>;
}

impl<T, E> IntoProcessError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_process_error(self, name: &str) -> Result<T> {
        self.map_err(|e| Error::process(name, e))
    }
}

/// Extension for results that may carry the closed-channel signal.
pub trait ClosedExt {
    /// Turn `Err(ChannelClosed)` into `Ok(())`, keeping every other error.
    fn closed_ok(self) -> Result<()>;
}

impl ClosedExt for Result<()> {
    fn closed_ok(self) -> Result<()> {
        match self {
            Err(Error::ChannelClosed) => Ok(()),
            other => other,
        }
    }
}
