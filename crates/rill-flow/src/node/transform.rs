use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::caps::{
    Consumer, Producer, ReadableAcceptor, ReadableProvider, WritableAcceptor, WritableProvider,
};
use crate::channel::{Channel, Read, DEFAULT_CHANNEL_CAPACITY};
use crate::edge::{ChannelReader, ChannelWriter, EdgeItem, Ledger, ReadableHandle, WritableHandle};
use crate::error::FlowError;

/// Runnable intermediate node: reads `T` upstream, maps, writes `U`
/// downstream. Owns a channel on each side so it can be wired to either
/// runnable or component neighbors; when the upstream half closes it
/// flushes and releases the downstream half.
pub struct Node<T: EdgeItem, U: EdgeItem = T> {
    inner: Arc<NodeInner<T, U>>,
    map: Mutex<Option<Box<dyn FnMut(T) -> U + Send>>>,
}

struct NodeInner<T: EdgeItem, U: EdgeItem> {
    in_channel: Arc<Channel<T>>,
    out_channel: Arc<Channel<U>>,
    input: Mutex<Option<ReadableHandle<T>>>,
    output: Mutex<Option<WritableHandle<U>>>,
    upstream_connected: AtomicBool,
    downstream_connected: AtomicBool,
    ledger: Arc<Ledger>,
}

impl<T: EdgeItem> Node<T, T> {
    /// Identity node, useful as a buffering stage.
    pub fn passthrough() -> Self {
        Self::new(|value| value)
    }
}

impl<T: EdgeItem, U: EdgeItem> Node<T, U> {
    pub fn new(map: impl FnMut(T) -> U + Send + 'static) -> Self {
        let in_channel = Channel::bounded(DEFAULT_CHANNEL_CAPACITY);
        let out_channel = Channel::bounded(DEFAULT_CHANNEL_CAPACITY);
        let input = ReadableHandle::new(Arc::new(ChannelReader {
            channel: Arc::clone(&in_channel),
        }));
        let output = WritableHandle::new(Arc::new(ChannelWriter {
            channel: Arc::clone(&out_channel),
        }));
        Self {
            inner: Arc::new(NodeInner {
                in_channel,
                out_channel,
                input: Mutex::new(Some(input)),
                output: Mutex::new(Some(output)),
                upstream_connected: AtomicBool::new(false),
                downstream_connected: AtomicBool::new(false),
                ledger: Arc::new(Ledger::default()),
            }),
            map: Mutex::new(Some(Box::new(map))),
        }
    }

    pub async fn run(&self) {
        let Some(mut map) = self.map.lock().expect("node map lock").take() else {
            return;
        };
        let Some(input) = self.inner.input.lock().expect("node input lock").take() else {
            return;
        };
        let Some(output) = self.inner.output.lock().expect("node output lock").take() else {
            return;
        };
        loop {
            match input.await_read().await {
                Read::Item(value) => {
                    if !output.await_write(map(value)).await.is_success() {
                        break;
                    }
                }
                _ => break,
            }
        }
        drop(input);
        drop(output);
    }
}

impl<T: EdgeItem, U: EdgeItem> Producer<U> for Node<T, U> {
    fn writable_acceptor(&self) -> Option<Arc<dyn WritableAcceptor<U>>> {
        Some(self.inner.clone())
    }

    fn readable_provider(&self) -> Option<Arc<dyn ReadableProvider<U>>> {
        Some(self.inner.clone())
    }
}

impl<T: EdgeItem, U: EdgeItem> Consumer<T> for Node<T, U> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        Some(self.inner.clone())
    }

    fn readable_acceptor(&self) -> Option<Arc<dyn ReadableAcceptor<T>>> {
        Some(self.inner.clone())
    }
}

impl<T: EdgeItem, U: EdgeItem> WritableAcceptor<U> for NodeInner<T, U> {
    fn ready_to_accept(&self) -> Result<(), FlowError> {
        if self.downstream_connected.load(Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        Ok(())
    }

    fn accept_writable(&self, edge: WritableHandle<U>) -> Result<(), FlowError> {
        if self.downstream_connected.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        *self.output.lock().expect("node output lock") = Some(edge);
        Ok(())
    }
}

impl<T: EdgeItem, U: EdgeItem> ReadableProvider<U> for NodeInner<T, U> {
    fn readable_edge(&self) -> Result<ReadableHandle<U>, FlowError> {
        if self.downstream_connected.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        let release = Ledger::issue(&self.ledger);
        let channel = Arc::clone(&self.out_channel);
        Ok(ReadableHandle::new(Arc::new(ChannelReader {
            channel: Arc::clone(&self.out_channel),
        }))
        .with_release(release)
        .with_release(move || channel.close()))
    }
}

impl<T: EdgeItem, U: EdgeItem> WritableProvider<T> for NodeInner<T, U> {
    fn writable_edge(&self) -> Result<WritableHandle<T>, FlowError> {
        if self.upstream_connected.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        let release = Ledger::issue(&self.ledger);
        let channel = Arc::clone(&self.in_channel);
        Ok(WritableHandle::new(Arc::new(ChannelWriter {
            channel: Arc::clone(&self.in_channel),
        }))
        .with_release(release)
        .with_release(move || channel.close()))
    }
}

impl<T: EdgeItem, U: EdgeItem> ReadableAcceptor<T> for NodeInner<T, U> {
    fn ready_to_accept(&self) -> Result<(), FlowError> {
        if self.upstream_connected.load(Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        Ok(())
    }

    fn accept_readable(&self, edge: ReadableHandle<T>) -> Result<(), FlowError> {
        if self.upstream_connected.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        *self.input.lock().expect("node input lock") = Some(edge);
        Ok(())
    }
}

impl<T: EdgeItem, U: EdgeItem> Drop for Node<T, U> {
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("Node");
    }
}
