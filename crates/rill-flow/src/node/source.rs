use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::caps::{Producer, ReadableProvider, WritableAcceptor};
use crate::channel::{Channel, DEFAULT_CHANNEL_CAPACITY};
use crate::edge::{ChannelReader, ChannelWriter, EdgeItem, Ledger, ReadableHandle, WritableHandle};
use crate::error::FlowError;

/// Runnable producer of values. Owns a channel so a downstream reader
/// can pull from it, and alternatively accepts a downstream-provided
/// writable half to push into. Exactly one of the two may be engaged.
///
/// `run` drives the generator until it returns `None` or the downstream
/// stops accepting, then releases the connection, which propagates
/// `Closed`.
pub struct Source<T: EdgeItem> {
    inner: Arc<SourceInner<T>>,
    generator: Mutex<Option<Box<dyn FnMut() -> Option<T> + Send>>>,
}

struct SourceInner<T: EdgeItem> {
    channel: Arc<Channel<T>>,
    output: Mutex<Option<WritableHandle<T>>>,
    connected: AtomicBool,
    ledger: Arc<Ledger>,
}

impl<T: EdgeItem> Source<T> {
    pub fn new(generator: impl FnMut() -> Option<T> + Send + 'static) -> Self {
        let channel = Channel::bounded(DEFAULT_CHANNEL_CAPACITY);
        let writer = WritableHandle::new(Arc::new(ChannelWriter {
            channel: Arc::clone(&channel),
        }));
        Self {
            inner: Arc::new(SourceInner {
                channel,
                output: Mutex::new(Some(writer)),
                connected: AtomicBool::new(false),
                ledger: Arc::new(Ledger::default()),
            }),
            generator: Mutex::new(Some(Box::new(generator))),
        }
    }

    pub fn from_iter<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let mut values = values.into_iter();
        Self::new(move || values.next())
    }

    /// Produces until the generator is exhausted or the downstream half
    /// reports a non-success status, then releases the connection.
    pub async fn run(&self) {
        let Some(mut generator) = self.generator.lock().expect("source generator lock").take()
        else {
            return;
        };
        let Some(output) = self.inner.output.lock().expect("source output lock").take() else {
            return;
        };
        while let Some(value) = generator() {
            if !output.await_write(value).await.is_success() {
                break;
            }
        }
        drop(output);
    }
}

impl<T: EdgeItem> Producer<T> for Source<T> {
    fn writable_acceptor(&self) -> Option<Arc<dyn WritableAcceptor<T>>> {
        Some(self.inner.clone())
    }

    fn readable_provider(&self) -> Option<Arc<dyn ReadableProvider<T>>> {
        Some(self.inner.clone())
    }
}

impl<T: EdgeItem> WritableAcceptor<T> for SourceInner<T> {
    fn ready_to_accept(&self) -> Result<(), FlowError> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        Ok(())
    }

    fn accept_writable(&self, edge: WritableHandle<T>) -> Result<(), FlowError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        // The push path bypasses the source's own channel entirely.
        *self.output.lock().expect("source output lock") = Some(edge);
        Ok(())
    }
}

impl<T: EdgeItem> ReadableProvider<T> for SourceInner<T> {
    fn readable_edge(&self) -> Result<ReadableHandle<T>, FlowError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        let release = Ledger::issue(&self.ledger);
        let channel = Arc::clone(&self.channel);
        Ok(ReadableHandle::new(Arc::new(ChannelReader {
            channel: Arc::clone(&self.channel),
        }))
        .with_release(release)
        .with_release(move || channel.close()))
    }
}

impl<T: EdgeItem> Drop for Source<T> {
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("Source");
    }
}
