//! Fan-out of one channel into two.

use async_trait::async_trait;

use crate::channel::{Channel, ChannelReader, ChannelWriter};
use crate::error::{Error, Result};
use crate::process::Process;

/// Copies every value read from `input` to both outputs.
///
/// Both writes for a value complete before the next read, so the two outputs
/// see the input sequence in the same order. When the input closes, or either
/// output is closed, both outputs are disconnected and the process ends.
pub struct Delta<T> {
    name: String,
    input: ChannelReader<T>,
    outputs: Option<(ChannelWriter<T>, ChannelWriter<T>)>,
}

impl<T> Delta<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wire a delta between an input channel and two output channels
    pub fn new(input: &Channel<T>, out1: &Channel<T>, out2: &Channel<T>) -> Self {
        Self {
            name: "delta".to_string(),
            input: input.reader(),
            outputs: Some((out1.writer(), out2.writer())),
        }
    }

    /// Wire a delta to `input` and two fresh rendezvous output channels
    pub fn with_outputs(input: &Channel<T>) -> (Self, Channel<T>, Channel<T>) {
        let out1 = Channel::rendezvous();
        let out2 = Channel::rendezvous();
        let delta = Self::new(input, &out1, &out2);
        (delta, out1, out2)
    }

    /// Set the name used in log records
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<T> Process for Delta<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> Result<()> {
        // Dropped on every exit path, which disconnects both outputs.
        let Some((out1, out2)) = self.outputs.take() else {
            return Ok(());
        };

        match pump(&self.input, &out1, &out2).await {
            Err(Error::ChannelClosed) => {
                tracing::debug!(process = %self.name, "delta finished");
                Ok(())
            }
            other => other,
        }
    }
}

async fn pump<T: Clone>(
    input: &ChannelReader<T>,
    out1: &ChannelWriter<T>,
    out2: &ChannelWriter<T>,
) -> Result<()> {
    loop {
        let value = input.read().await?;
        let (first, second) = tokio::join!(out1.write(value.clone()), out2.write(value));
        first?;
        second?;
    }
}
