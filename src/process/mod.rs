//! The process contract and composable processes.
//!
//! A process is a unit of work wired to channel endpoints. It runs until its
//! channels signal closed (or it fails) and releases its endpoints on every
//! exit path, so closure propagates downstream through a pipeline.

mod delta;

pub use delta::Delta;

use async_trait::async_trait;
use std::future::Future;

use crate::error::Result;

/// A unit that can be run to completion.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use pipewright::channel::{ChannelReader, ChannelWriter};
/// use pipewright::error::{ClosedExt, Result};
/// use pipewright::process::Process;
///
/// struct Doubler {
///     input: ChannelReader<i64>,
///     output: ChannelWriter<i64>,
/// }
///
/// #[async_trait]
/// impl Process for Doubler {
///     fn name(&self) -> &str {
///         "doubler"
///     }
///
///     async fn run(&mut self) -> Result<()> {
///         loop {
///             let value = match self.input.read().await {
///                 Ok(value) => value,
///                 Err(e) => return Err(e).closed_ok(),
///             };
///             self.output.write(value * 2).await?;
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Process: Send {
    /// Name used to attribute log records and failures to this process
    fn name(&self) -> &str;

    /// Run until the wired channels signal closed.
    ///
    /// Closed channels are normal termination and should yield `Ok(())`.
    async fn run(&mut self) -> Result<()>;
}

#[async_trait]
impl<P: Process + ?Sized> Process for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(&mut self) -> Result<()> {
        (**self).run().await
    }
}

/// Helper function to create a named process from an async closure
pub fn process_from_fn<F, Fut>(name: impl Into<String>, f: F) -> FnProcess<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    FnProcess {
        name: name.into(),
        f,
    }
}

/// A process created from a function
pub struct FnProcess<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Process for FnProcess<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> Result<()> {
        (self.f)().await
    }
}
