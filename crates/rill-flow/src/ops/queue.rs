//! Work-stealing buffer: any number of writers feed an internal
//! channel, any number of readers drain it; each value goes to exactly
//! one reader.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::caps::{Consumer, Producer, ReadableProvider, WritableProvider};
use crate::channel::{Channel, DEFAULT_CHANNEL_CAPACITY};
use crate::edge::{ChannelReader, ChannelWriter, EdgeItem, Ledger, ReadableHandle, WritableHandle};
use crate::error::FlowError;

pub struct Queue<T: EdgeItem> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T: EdgeItem> {
    channel: Arc<Channel<T>>,
    writers: AtomicUsize,
    ledger: Arc<Ledger>,
}

impl<T: EdgeItem> Queue<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                channel: Channel::bounded(capacity),
                writers: AtomicUsize::new(0),
                ledger: Arc::new(Ledger::default()),
            }),
        }
    }

    /// Force-closes the internal channel; pending values stay readable
    /// until drained. Used by teardown paths that cannot wait for the
    /// writers to release naturally.
    pub fn close(&self) {
        self.inner.channel.close();
    }
}

impl<T: EdgeItem> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct QueueWriterProvider<T: EdgeItem> {
    inner: Arc<QueueInner<T>>,
}

impl<T: EdgeItem> WritableProvider<T> for QueueWriterProvider<T> {
    fn writable_edge(&self) -> Result<WritableHandle<T>, FlowError> {
        self.inner.writers.fetch_add(1, Ordering::SeqCst);
        let release = Ledger::issue(&self.inner.ledger);
        let inner = Arc::clone(&self.inner);
        Ok(WritableHandle::new(Arc::new(ChannelWriter {
            channel: Arc::clone(&self.inner.channel),
        }) as Arc<dyn crate::edge::WritableEdge<T>>)
        .with_release(release)
        .with_release(move || {
            if inner.writers.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.channel.close();
            }
        }))
    }
}

struct QueueReaderProvider<T: EdgeItem> {
    inner: Arc<QueueInner<T>>,
}

impl<T: EdgeItem> ReadableProvider<T> for QueueReaderProvider<T> {
    fn readable_edge(&self) -> Result<ReadableHandle<T>, FlowError> {
        let release = Ledger::issue(&self.inner.ledger);
        Ok(ReadableHandle::new(Arc::new(ChannelReader {
            channel: Arc::clone(&self.inner.channel),
        })
            as Arc<dyn crate::edge::ReadableEdge<T>>)
        .with_release(release))
    }
}

impl<T: EdgeItem> Consumer<T> for Queue<T> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        Some(Arc::new(QueueWriterProvider {
            inner: self.inner.clone(),
        }))
    }
}

impl<T: EdgeItem> Producer<T> for Queue<T> {
    fn readable_provider(&self) -> Option<Arc<dyn ReadableProvider<T>>> {
        Some(Arc::new(QueueReaderProvider {
            inner: self.inner.clone(),
        }))
    }
}

impl<T: EdgeItem> Drop for Queue<T> {
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("Queue");
    }
}
