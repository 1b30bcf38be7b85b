use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::caps::{Consumer, ReadableAcceptor, WritableProvider};
use crate::channel::{Channel, Read, DEFAULT_CHANNEL_CAPACITY};
use crate::edge::{ChannelReader, ChannelWriter, EdgeItem, Ledger, ReadableHandle, WritableHandle};
use crate::error::FlowError;

/// Runnable terminal consumer. Owns a channel so an upstream writer can
/// push into it, and alternatively accepts an upstream-provided
/// readable half to pull from. Exactly one of the two may be engaged.
pub struct Sink<T: EdgeItem> {
    inner: Arc<SinkInner<T>>,
    handler: Mutex<Option<Box<dyn FnMut(T) + Send>>>,
}

struct SinkInner<T: EdgeItem> {
    channel: Arc<Channel<T>>,
    input: Mutex<Option<ReadableHandle<T>>>,
    connected: AtomicBool,
    ledger: Arc<Ledger>,
}

impl<T: EdgeItem> Sink<T> {
    pub fn new(handler: impl FnMut(T) + Send + 'static) -> Self {
        let channel = Channel::bounded(DEFAULT_CHANNEL_CAPACITY);
        let reader = ReadableHandle::new(Arc::new(ChannelReader {
            channel: Arc::clone(&channel),
        }));
        Self {
            inner: Arc::new(SinkInner {
                channel,
                input: Mutex::new(Some(reader)),
                connected: AtomicBool::new(false),
                ledger: Arc::new(Ledger::default()),
            }),
            handler: Mutex::new(Some(Box::new(handler))),
        }
    }

    /// Consumes until the upstream half reports `Closed`, then releases
    /// the connection.
    pub async fn run(&self) {
        let Some(mut handler) = self.handler.lock().expect("sink handler lock").take() else {
            return;
        };
        let Some(input) = self.inner.input.lock().expect("sink input lock").take() else {
            return;
        };
        loop {
            match input.await_read().await {
                Read::Item(value) => handler(value),
                _ => break,
            }
        }
        drop(input);
    }
}

impl<T: EdgeItem> Consumer<T> for Sink<T> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        Some(self.inner.clone())
    }

    fn readable_acceptor(&self) -> Option<Arc<dyn ReadableAcceptor<T>>> {
        Some(self.inner.clone())
    }
}

impl<T: EdgeItem> WritableProvider<T> for SinkInner<T> {
    fn writable_edge(&self) -> Result<WritableHandle<T>, FlowError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        let release = Ledger::issue(&self.ledger);
        let channel = Arc::clone(&self.channel);
        Ok(WritableHandle::new(Arc::new(ChannelWriter {
            channel: Arc::clone(&self.channel),
        }))
        .with_release(release)
        .with_release(move || channel.close()))
    }
}

impl<T: EdgeItem> ReadableAcceptor<T> for SinkInner<T> {
    fn ready_to_accept(&self) -> Result<(), FlowError> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        Ok(())
    }

    fn accept_readable(&self, edge: ReadableHandle<T>) -> Result<(), FlowError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        // The pull path leaves the sink's own channel unused.
        *self.input.lock().expect("sink input lock") = Some(edge);
        Ok(())
    }
}

impl<T: EdgeItem> Drop for Sink<T> {
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("Sink");
    }
}
