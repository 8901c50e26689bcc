//! Synchronous channels connecting independently scheduled processes.
//!
//! A [`Channel`] is either a rendezvous point (capacity `0`, a write only
//! completes once a reader has taken the value) or a bounded FIFO buffer.
//! Writers and readers register through connect/disconnect accounting; when
//! the last writer disconnects the channel closes and every suspended reader
//! wakes up with [`Error::ChannelClosed`].
//!
//! ## Example
//!
//! ```rust
//! use pipewright::channel::Channel;
//!
//! # tokio_test::block_on(async {
//! let channel = Channel::bounded(4);
//! let writer = channel.writer();
//! let reader = channel.reader();
//!
//! writer.write(1).await.unwrap();
//! writer.write(2).await.unwrap();
//! drop(writer);
//!
//! assert_eq!(reader.read().await.unwrap(), 1);
//! assert_eq!(reader.read().await.unwrap(), 2);
//! assert!(reader.read().await.unwrap_err().is_closed());
//! # });
//! ```

mod endpoint;

pub use endpoint::{ChannelReader, ChannelWriter};

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::{Error, Result};

struct State<T> {
    /// Buffered values tagged with their write sequence number
    buffer: VecDeque<(u64, T)>,
    next_seq: u64,
    writers: usize,
    readers: usize,
    closed: bool,
}

struct Shared<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    /// Signalled when a value is buffered or the channel closes
    readable: Notify,
    /// Signalled when a value is taken or the channel closes
    writable: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots(&self) -> usize {
        self.capacity.max(1)
    }

    fn wake_all(&self) {
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

/// A shared handle to a rendezvous or bounded channel.
///
/// Cloning the handle does not register a reader or writer; use
/// [`Channel::writer`] and [`Channel::reader`] (or the explicit connect calls)
/// for that.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Channel<T> {
    /// Create a channel; a capacity of `0` makes it a rendezvous channel.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity,
                state: Mutex::new(State {
                    buffer: VecDeque::with_capacity(capacity.max(1)),
                    next_seq: 0,
                    writers: 0,
                    readers: 0,
                    closed: false,
                }),
                readable: Notify::new(),
                writable: Notify::new(),
            }),
        }
    }

    /// Create a rendezvous channel
    pub fn rendezvous() -> Self {
        Self::new(0)
    }

    /// Create a channel buffering up to `capacity` values
    pub fn bounded(capacity: usize) -> Self {
        Self::new(capacity)
    }

    /// Register a writer and return a guard that disconnects it on drop
    pub fn writer(&self) -> ChannelWriter<T> {
        ChannelWriter::connect(self.clone())
    }

    /// Register a reader and return a guard that disconnects it on drop
    pub fn reader(&self) -> ChannelReader<T> {
        ChannelReader::connect(self.clone())
    }

    /// Write a value.
    ///
    /// On a rendezvous channel this suspends until a reader has taken the
    /// value; on a bounded channel it suspends until buffer space is free.
    /// Fails with [`Error::ChannelClosed`] when the channel is (or becomes)
    /// closed before the hand-off completes.
    pub async fn write(&self, value: T) -> Result<()> {
        let seq = loop {
            let notified = self.shared.writable.notified();
            {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(Error::ChannelClosed);
                }
                if state.buffer.len() < self.shared.slots() {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.buffer.push_back((seq, value));
                    break seq;
                }
            }
            notified.await;
        };
        self.shared.readable.notify_waiters();

        if self.shared.capacity > 0 {
            return Ok(());
        }

        // Rendezvous: wait for a reader to take the value. If this future is
        // dropped first the guard withdraws it again.
        let mut pending = PendingWrite {
            shared: &self.shared,
            seq,
            armed: true,
        };
        loop {
            let notified = self.shared.writable.notified();
            {
                let mut state = self.shared.lock();
                match position(&state.buffer, seq) {
                    None => {
                        pending.armed = false;
                        return Ok(());
                    }
                    Some(index) if state.closed => {
                        state.buffer.remove(index);
                        pending.armed = false;
                        return Err(Error::ChannelClosed);
                    }
                    Some(_) => {}
                }
            }
            notified.await;
        }
    }

    /// Read the next value, suspending until one is available.
    ///
    /// Values buffered before the channel closed are still delivered; once the
    /// buffer is drained a closed channel yields [`Error::ChannelClosed`].
    pub async fn read(&self) -> Result<T> {
        loop {
            let notified = self.shared.readable.notified();
            if let Some(value) = self.try_read()? {
                return Ok(value);
            }
            notified.await;
        }
    }

    /// Read with a deadline; `Ok(None)` means nothing arrived in time.
    pub async fn read_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        match tokio::time::timeout(timeout, self.read()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Take a value if one is buffered, without suspending.
    pub fn try_read(&self) -> Result<Option<T>> {
        let mut state = self.shared.lock();
        let popped = state.buffer.pop_front();
        match popped {
            Some((_, value)) => {
                drop(state);
                self.shared.writable.notify_waiters();
                Ok(Some(value))
            }
            None if state.closed => Err(Error::ChannelClosed),
            None => Ok(None),
        }
    }

    /// Register a writer
    pub fn write_connect(&self) {
        let mut state = self.shared.lock();
        state.writers += 1;
        tracing::trace!(writers = state.writers, "channel writer connected");
    }

    /// Deregister a writer; the last writer to leave closes the channel.
    pub fn write_disconnect(&self) {
        let mut state = self.shared.lock();
        state.writers = state.writers.saturating_sub(1);
        tracing::trace!(writers = state.writers, "channel writer disconnected");
        if state.writers == 0 && !state.closed {
            state.closed = true;
            drop(state);
            tracing::trace!("channel closed after last writer disconnected");
            self.shared.wake_all();
        }
    }

    /// Register a reader
    pub fn read_connect(&self) {
        self.shared.lock().readers += 1;
    }

    /// Deregister a reader
    pub fn read_disconnect(&self) {
        let mut state = self.shared.lock();
        state.readers = state.readers.saturating_sub(1);
    }

    /// Close the channel regardless of how many writers are connected.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if !state.closed {
            state.closed = true;
            drop(state);
            tracing::trace!("channel closed explicitly");
            self.shared.wake_all();
        }
    }

    /// Number of connected writers
    pub fn writer_count(&self) -> usize {
        self.shared.lock().writers
    }

    /// Number of connected readers
    pub fn reader_count(&self) -> usize {
        self.shared.lock().readers
    }

    /// Whether the channel has reached its terminal closed state
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of values currently waiting to be read
    pub fn len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Whether no values are waiting to be read
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity; `0` for a rendezvous channel
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

fn position<T>(buffer: &VecDeque<(u64, T)>, seq: u64) -> Option<usize> {
    buffer.binary_search_by_key(&seq, |(s, _)| *s).ok()
}

/// Withdraws a rendezvous value whose writer stopped waiting for it.
struct PendingWrite<'a, T> {
    shared: &'a Shared<T>,
    seq: u64,
    armed: bool,
}

impl<T> Drop for PendingWrite<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.lock();
        if let Some(index) = position(&state.buffer, self.seq) {
            state.buffer.remove(index);
            drop(state);
            self.shared.writable.notify_waiters();
        }
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::rendezvous()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Channel")
            .field("capacity", &self.shared.capacity)
            .field("buffered", &state.buffer.len())
            .field("writers", &state.writers)
            .field("readers", &state.readers)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_rendezvous_write_waits_for_reader() {
        let channel = Channel::rendezvous();
        let writer = channel.writer();

        let handle = tokio::spawn(async move { writer.write(42).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        assert_eq!(channel.len(), 1);

        assert_eq!(channel.read().await.unwrap(), 42);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let channel = Channel::bounded(3);
        let writer = channel.writer();
        let reader = channel.reader();

        let producer = tokio::spawn(async move {
            for i in 0..50 {
                writer.write(i).await.unwrap();
            }
        });

        let mut received = Vec::new();
        while let Ok(value) = reader.read().await {
            received.push(value);
        }
        producer.await.unwrap();
        assert_eq!(received, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_bounded_write_blocks_when_full() {
        let channel = Channel::bounded(1);
        let writer = channel.writer();
        writer.write(1).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), writer.write(2)).await;
        assert!(blocked.is_err());
        assert_eq!(channel.len(), 1);
    }

    #[tokio::test]
    async fn test_last_writer_disconnect_wakes_readers() {
        let channel: Channel<u32> = Channel::rendezvous();
        let first = channel.writer();
        let second = first.clone();
        assert_eq!(channel.writer_count(), 2);

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let reader = channel.reader();
                tokio::spawn(async move { reader.read().await })
            })
            .collect();

        drop(first);
        assert!(!channel.is_closed());
        drop(second);
        assert!(channel.is_closed());

        for reader in readers {
            assert!(reader.await.unwrap().unwrap_err().is_closed());
        }
        assert_eq!(channel.reader_count(), 0);
    }

    #[tokio::test]
    async fn test_buffered_values_drain_after_close() {
        let channel = Channel::bounded(2);
        let writer = channel.writer();
        writer.write("a").await.unwrap();
        writer.write("b").await.unwrap();
        drop(writer);

        assert_eq!(channel.read().await.unwrap(), "a");
        assert_eq!(channel.read().await.unwrap(), "b");
        assert!(channel.read().await.is_err());
    }

    #[tokio::test]
    async fn test_write_to_closed_channel_is_rejected() {
        let channel = Channel::bounded(1);
        channel.close();
        assert!(matches!(channel.write(1).await, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_pending_rendezvous_write_fails_on_close() {
        let channel = Channel::rendezvous();
        let writer = channel.writer();
        let pending = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.write(5).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        channel.close();
        assert!(pending.await.unwrap().unwrap_err().is_closed());
        // The withdrawn value is never delivered.
        assert!(channel.read().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_read_timeout_returns_none() {
        let channel: Channel<u8> = Channel::rendezvous();
        let _writer = channel.writer();
        let result = channel.read_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_dropped_rendezvous_write_is_withdrawn() {
        let channel = Channel::rendezvous();
        let writer = channel.writer();

        let timed_out = tokio::time::timeout(Duration::from_millis(10), writer.write(9)).await;
        assert!(timed_out.is_err());
        assert!(channel.is_empty());
        assert!(matches!(channel.try_read(), Ok(None)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_value_received_once() {
        let channel = Channel::rendezvous();
        let mut producers = Vec::new();
        for p in 0..4u32 {
            let writer = channel.writer();
            producers.push(tokio::spawn(async move {
                for i in 0..100u32 {
                    writer.write(p * 1000 + i).await.unwrap();
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..3 {
            let reader = channel.reader();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Ok(v) = reader.read().await {
                    seen.push(v);
                }
                seen
            }));
        }

        for producer in producers {
            producer.await.unwrap();
        }
        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort_unstable();
        let mut expected: Vec<u32> = (0..4u32)
            .flat_map(|p| (0..100u32).map(move |i| p * 1000 + i))
            .collect();
        expected.sort_unstable();
        assert_eq!(all, expected);
    }
}
