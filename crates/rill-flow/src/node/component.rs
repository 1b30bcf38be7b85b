//! Taskless endpoint variants. Components own no task of their own:
//! a `SourceComponent` is pulled by the downstream reader, a
//! `SinkComponent` and `NodeComponent` are pushed by the upstream
//! writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rill_core::Status;

use crate::caps::{Consumer, Producer, ReadableProvider, WritableAcceptor, WritableProvider};
use crate::channel::Read;
use crate::edge::{EdgeItem, Ledger, ReadableEdge, ReadableHandle, WritableEdge, WritableHandle};
use crate::error::FlowError;

type CompletionHook = Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>;

fn fire(hook: &CompletionHook) {
    if let Some(hook) = hook.lock().expect("completion hook lock").take() {
        hook();
    }
}

/// Pull-driven producer. The generator is invoked once per downstream
/// read and signals termination by returning [`Read::Closed`]; the
/// completion hook fires when the downstream releases the edge.
pub struct SourceComponent<T: EdgeItem> {
    inner: Arc<SourceComponentInner<T>>,
}

struct SourceComponentInner<T: EdgeItem> {
    generator: Mutex<Box<dyn FnMut() -> Read<T> + Send>>,
    on_complete: CompletionHook,
    issued: AtomicBool,
    ledger: Arc<Ledger>,
}

impl<T: EdgeItem> SourceComponent<T> {
    pub fn new(generator: impl FnMut() -> Read<T> + Send + 'static) -> Self {
        Self {
            inner: Arc::new(SourceComponentInner {
                generator: Mutex::new(Box::new(generator)),
                on_complete: Arc::new(Mutex::new(None)),
                issued: AtomicBool::new(false),
                ledger: Arc::new(Ledger::default()),
            }),
        }
    }

    pub fn from_iter<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let mut values = values.into_iter();
        Self::new(move || match values.next() {
            Some(value) => Read::Item(value),
            None => Read::Closed,
        })
    }

    pub fn on_complete(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.inner.on_complete.lock().expect("completion hook lock") = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl<T: EdgeItem> ReadableEdge<T> for SourceComponentInner<T> {
    async fn await_read(&self) -> Read<T> {
        (*self.generator.lock().expect("source component lock"))()
    }
}

struct SourceComponentProvider<T: EdgeItem> {
    inner: Arc<SourceComponentInner<T>>,
}

impl<T: EdgeItem> ReadableProvider<T> for SourceComponentProvider<T> {
    fn readable_edge(&self) -> Result<ReadableHandle<T>, FlowError> {
        if self.inner.issued.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        let release = Ledger::issue(&self.inner.ledger);
        let on_complete = Arc::clone(&self.inner.on_complete);
        Ok(
            ReadableHandle::new(Arc::clone(&self.inner) as Arc<dyn ReadableEdge<T>>)
                .with_release(release)
                .with_release(move || fire(&on_complete)),
        )
    }
}

impl<T: EdgeItem> Producer<T> for SourceComponent<T> {
    fn readable_provider(&self) -> Option<Arc<dyn ReadableProvider<T>>> {
        Some(Arc::new(SourceComponentProvider {
            inner: self.inner.clone(),
        }))
    }
}

impl<T: EdgeItem> Drop for SourceComponent<T> {
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("SourceComponent");
    }
}

/// Push-driven terminal consumer. The upstream writer calls straight
/// into `on_next`; releasing the writable half fires `on_complete`.
pub struct SinkComponent<T: EdgeItem> {
    inner: Arc<SinkComponentInner<T>>,
}

struct SinkComponentInner<T: EdgeItem> {
    on_next: Mutex<Box<dyn FnMut(T) -> Status + Send>>,
    on_complete: CompletionHook,
    issued: AtomicBool,
    ledger: Arc<Ledger>,
}

impl<T: EdgeItem> SinkComponent<T> {
    pub fn new(on_next: impl FnMut(T) -> Status + Send + 'static) -> Self {
        Self {
            inner: Arc::new(SinkComponentInner {
                on_next: Mutex::new(Box::new(on_next)),
                on_complete: Arc::new(Mutex::new(None)),
                issued: AtomicBool::new(false),
                ledger: Arc::new(Ledger::default()),
            }),
        }
    }

    pub fn on_complete(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.inner.on_complete.lock().expect("completion hook lock") = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl<T: EdgeItem> WritableEdge<T> for SinkComponentInner<T> {
    async fn await_write(&self, value: T) -> Status {
        (*self.on_next.lock().expect("sink component lock"))(value)
    }
}

struct SinkComponentProvider<T: EdgeItem> {
    inner: Arc<SinkComponentInner<T>>,
}

impl<T: EdgeItem> WritableProvider<T> for SinkComponentProvider<T> {
    fn writable_edge(&self) -> Result<WritableHandle<T>, FlowError> {
        if self.inner.issued.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        let release = Ledger::issue(&self.inner.ledger);
        let on_complete = Arc::clone(&self.inner.on_complete);
        Ok(
            WritableHandle::new(Arc::clone(&self.inner) as Arc<dyn WritableEdge<T>>)
                .with_release(release)
                .with_release(move || fire(&on_complete)),
        )
    }
}

impl<T: EdgeItem> Consumer<T> for SinkComponent<T> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        Some(Arc::new(SinkComponentProvider {
            inner: self.inner.clone(),
        }))
    }
}

impl<T: EdgeItem> Drop for SinkComponent<T> {
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("SinkComponent");
    }
}

/// Push-through transform without a task: values written upstream are
/// mapped and forwarded synchronously into the accepted downstream
/// half. Releasing the upstream half releases the downstream half.
pub struct NodeComponent<T: EdgeItem, U: EdgeItem = T> {
    inner: Arc<NodeComponentInner<T, U>>,
}

struct NodeComponentInner<T: EdgeItem, U: EdgeItem> {
    map: Mutex<Box<dyn FnMut(T) -> U + Send>>,
    downstream: Mutex<Option<WritableHandle<U>>>,
    upstream_issued: AtomicBool,
    downstream_connected: AtomicBool,
    ledger: Arc<Ledger>,
}

impl<T: EdgeItem> NodeComponent<T, T> {
    pub fn passthrough() -> Self {
        Self::new(|value| value)
    }
}

impl<T: EdgeItem, U: EdgeItem> NodeComponent<T, U> {
    pub fn new(map: impl FnMut(T) -> U + Send + 'static) -> Self {
        Self {
            inner: Arc::new(NodeComponentInner {
                map: Mutex::new(Box::new(map)),
                downstream: Mutex::new(None),
                upstream_issued: AtomicBool::new(false),
                downstream_connected: AtomicBool::new(false),
                ledger: Arc::new(Ledger::default()),
            }),
        }
    }
}

#[async_trait]
impl<T: EdgeItem, U: EdgeItem> WritableEdge<T> for NodeComponentInner<T, U> {
    async fn await_write(&self, value: T) -> Status {
        let mapped = (*self.map.lock().expect("node component map lock"))(value);
        let edge = self
            .downstream
            .lock()
            .expect("node component downstream lock")
            .as_ref()
            .map(|handle| handle.edge());
        match edge {
            Some(edge) => edge.await_write(mapped).await,
            None => Status::Closed,
        }
    }
}

struct NodeComponentProvider<T: EdgeItem, U: EdgeItem> {
    inner: Arc<NodeComponentInner<T, U>>,
}

impl<T: EdgeItem, U: EdgeItem> WritableProvider<T> for NodeComponentProvider<T, U> {
    fn writable_edge(&self) -> Result<WritableHandle<T>, FlowError> {
        if self.inner.upstream_issued.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        let release = Ledger::issue(&self.inner.ledger);
        let inner = Arc::clone(&self.inner);
        Ok(
            WritableHandle::new(Arc::clone(&self.inner) as Arc<dyn WritableEdge<T>>)
                .with_release(release)
                .with_release(move || {
                    // Upstream completion releases the downstream half.
                    inner
                        .downstream
                        .lock()
                        .expect("node component downstream lock")
                        .take();
                }),
        )
    }
}

impl<T: EdgeItem, U: EdgeItem> WritableAcceptor<U> for NodeComponentInner<T, U> {
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
        *self
            .downstream
            .lock()
            .expect("node component downstream lock") = Some(edge);
        Ok(())
    }
}

impl<T: EdgeItem, U: EdgeItem> Producer<U> for NodeComponent<T, U> {
    fn writable_acceptor(&self) -> Option<Arc<dyn WritableAcceptor<U>>> {
        Some(self.inner.clone())
    }
}

impl<T: EdgeItem, U: EdgeItem> Consumer<T> for NodeComponent<T, U> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        Some(Arc::new(NodeComponentProvider {
            inner: self.inner.clone(),
        }))
    }
}

impl<T: EdgeItem, U: EdgeItem> Drop for NodeComponent<T, U> {
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("NodeComponent");
    }
}
