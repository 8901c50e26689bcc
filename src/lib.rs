//! # CSP-style Process Runtime for Rust
//!
//! This crate provides a small Communicating-Sequential-Processes runtime
//! built on tokio: synchronous channels connecting independently scheduled
//! processes, a bounded worker pool that executes queued processes, and a
//! resetable scheduler loop for long-running polling work.
//!
//! ## Core Concepts
//!
//! - **Channel**: Rendezvous or bounded hand-off point with writer/reader accounting
//! - **Process**: A unit of work wired to channel endpoints, run to completion
//! - **Delta**: Fan-out process copying one channel into two
//! - **ProcessQueue**: Dispatches processes to a pool of idle-retiring workers
//! - **ResetableProcess**: Scheduler loop with pause, soft reset and hard reset
//!
//! ## Example
//!
//! ```rust
//! use pipewright::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let input = Channel::rendezvous();
//!     let (mut delta, left, right) = Delta::with_outputs(&input);
//!
//!     let left = left.reader();
//!     let right = right.reader();
//!     let writer = input.writer();
//!
//!     let fan_out = tokio::spawn(async move { delta.run().await });
//!     let producer = tokio::spawn(async move {
//!         for i in 0..3 {
//!             writer.write(i).await?;
//!         }
//!         Result::Ok(())
//!     });
//!
//!     for i in 0..3 {
//!         let (a, b) = tokio::join!(left.read(), right.read());
//!         assert_eq!((a?, b?), (i, i));
//!     }
//!
//!     producer.await.unwrap()?;
//!     fan_out.await.unwrap()?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod error;
pub mod process;
pub mod queue;
pub mod resetable;

mod metrics;

// Re-export commonly used items
pub mod prelude {
    pub use crate::channel::{Channel, ChannelReader, ChannelWriter};
    pub use crate::error::{ClosedExt, Error, Result};
    pub use crate::process::{process_from_fn, Delta, FnProcess, Process};
    pub use crate::queue::{ProcessQueue, QueueConfig, QueueSnapshot, WorkerInfo};
    pub use crate::resetable::{
        Execute, ResetHandle, ResetableProcess, SchedulerConfig, SchedulerSnapshot, Status,
    };
}

// Re-export main error type
pub use error::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
