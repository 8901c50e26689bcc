//! Connected channel endpoints.
//!
//! An endpoint is the RAII form of the connect/disconnect accounting: it
//! registers on creation and deregisters when dropped, so a process that
//! returns, fails or panics always releases the channels it was wired with.

use futures_core::Stream;
use std::fmt;
use std::time::Duration;

use super::Channel;
use crate::error::Result;

/// The writing end of a [`Channel`].
pub struct ChannelWriter<T> {
    channel: Channel<T>,
}

impl<T> ChannelWriter<T> {
    pub(super) fn connect(channel: Channel<T>) -> Self {
        channel.write_connect();
        Self { channel }
    }

    /// Write a value, see [`Channel::write`]
    pub async fn write(&self, value: T) -> Result<()> {
        self.channel.write(value).await
    }

    /// The channel this endpoint writes to
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }
}

impl<T> Clone for ChannelWriter<T> {
    fn clone(&self) -> Self {
        Self::connect(self.channel.clone())
    }
}

impl<T> Drop for ChannelWriter<T> {
    fn drop(&mut self) {
        self.channel.write_disconnect();
    }
}

impl<T> fmt::Debug for ChannelWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChannelWriter").field(&self.channel).finish()
    }
}

/// The reading end of a [`Channel`].
pub struct ChannelReader<T> {
    channel: Channel<T>,
}

impl<T> ChannelReader<T> {
    pub(super) fn connect(channel: Channel<T>) -> Self {
        channel.read_connect();
        Self { channel }
    }

    /// Read the next value, see [`Channel::read`]
    pub async fn read(&self) -> Result<T> {
        self.channel.read().await
    }

    /// Read with a deadline, see [`Channel::read_timeout`]
    pub async fn read_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        self.channel.read_timeout(timeout).await
    }

    /// Non-suspending read, see [`Channel::try_read`]
    pub fn try_read(&self) -> Result<Option<T>> {
        self.channel.try_read()
    }

    /// The channel this endpoint reads from
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }

    /// Turn this reader into a stream that ends when the channel closes.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |reader| async move {
            match reader.read().await {
                Ok(value) => Some((value, reader)),
                Err(_) => None,
            }
        })
    }
}

impl<T> Clone for ChannelReader<T> {
    fn clone(&self) -> Self {
        Self::connect(self.channel.clone())
    }
}

impl<T> Drop for ChannelReader<T> {
    fn drop(&mut self) {
        self.channel.read_disconnect();
    }
}

impl<T> fmt::Debug for ChannelReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChannelReader").field(&self.channel).finish()
    }
}
