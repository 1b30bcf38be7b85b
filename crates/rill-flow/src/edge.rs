//! Edge halves: the writable/readable traits, channel-backed
//! implementations, conversion adapters, and the RAII handles through
//! which connections are released.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rill_core::Status;
use tracing::error;

use crate::channel::{Channel, Read};

/// Marker for types that may travel on an edge.
pub trait EdgeItem: Send + 'static {}

impl<T: Send + 'static> EdgeItem for T {}

#[async_trait]
pub trait WritableEdge<T: EdgeItem>: Send + Sync {
    async fn await_write(&self, value: T) -> Status;
}

#[async_trait]
pub trait ReadableEdge<T: EdgeItem>: Send + Sync {
    async fn await_read(&self) -> Read<T>;
}

pub(crate) struct ChannelWriter<T> {
    pub(crate) channel: Arc<Channel<T>>,
}

#[async_trait]
impl<T: EdgeItem> WritableEdge<T> for ChannelWriter<T> {
    async fn await_write(&self, value: T) -> Status {
        self.channel.write(value).await
    }
}

pub(crate) struct ChannelReader<T> {
    pub(crate) channel: Arc<Channel<T>>,
}

#[async_trait]
impl<T: EdgeItem> ReadableEdge<T> for ChannelReader<T> {
    async fn await_read(&self) -> Read<T> {
        self.channel.read().await
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// Owning handle for the writable half of an edge. Dropping the handle
/// releases the connection: channel-backed halves close their channel
/// and component-backed halves fire their completion hook, which is how
/// `Closed` propagates downstream.
pub struct WritableHandle<T: EdgeItem> {
    edge: Arc<dyn WritableEdge<T>>,
    on_release: Vec<ReleaseHook>,
}

impl<T: EdgeItem> WritableHandle<T> {
    pub fn new(edge: Arc<dyn WritableEdge<T>>) -> Self {
        Self {
            edge,
            on_release: Vec::new(),
        }
    }

    pub fn with_release(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_release.push(Box::new(hook));
        self
    }

    pub async fn await_write(&self, value: T) -> Status {
        self.edge.await_write(value).await
    }

    /// Shared view of the underlying half, for writers that must not
    /// hold a lock across the write itself. Release hooks stay with the
    /// handle.
    pub fn edge(&self) -> Arc<dyn WritableEdge<T>> {
        Arc::clone(&self.edge)
    }
}

impl<T: EdgeItem> Drop for WritableHandle<T> {
    fn drop(&mut self) {
        for hook in self.on_release.drain(..) {
            hook();
        }
    }
}

/// Owning handle for the readable half of an edge. Dropping it releases
/// the connection; for channel-backed halves this closes the channel so
/// a still-running writer observes `Closed`.
pub struct ReadableHandle<T: EdgeItem> {
    edge: Arc<dyn ReadableEdge<T>>,
    on_release: Vec<ReleaseHook>,
}

impl<T: EdgeItem> ReadableHandle<T> {
    pub fn new(edge: Arc<dyn ReadableEdge<T>>) -> Self {
        Self {
            edge,
            on_release: Vec::new(),
        }
    }

    pub fn with_release(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_release.push(Box::new(hook));
        self
    }

    pub async fn await_read(&self) -> Read<T> {
        self.edge.await_read().await
    }

    pub async fn await_read_timeout(&self, timeout: Duration) -> Read<T> {
        match tokio::time::timeout(timeout, self.edge.await_read()).await {
            Ok(read) => read,
            Err(_) => Read::Timeout,
        }
    }
}

impl<T: EdgeItem> Drop for ReadableHandle<T> {
    fn drop(&mut self) {
        for hook in self.on_release.drain(..) {
            hook();
        }
    }
}

/// Per-node count of issued edge handles that are still live. A node
/// dropped while the count is nonzero violates the edges-first
/// destruction order and aborts the process.
#[derive(Default)]
pub(crate) struct Ledger {
    live: AtomicUsize,
}

impl Ledger {
    pub(crate) fn issue(ledger: &Arc<Ledger>) -> impl FnOnce() + Send + Sync + 'static {
        ledger.live.fetch_add(1, Ordering::SeqCst);
        let ledger = Arc::clone(ledger);
        move || {
            ledger.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn abort_if_connected(&self, node: &'static str) {
        let live = self.live();
        if live != 0 {
            error!(
                node,
                live, "node destroyed while edges are still connected; aborting"
            );
            std::process::abort();
        }
    }
}

/// Lossless-ish numeric widening used by the explicit conversion
/// adapter. Only the listed numeric pairs are provided; arbitrary
/// conversions are deliberately unavailable.
pub trait Upcast<From>: Sized {
    fn upcast(value: From) -> Self;
}

macro_rules! impl_upcast {
    ($($from:ty => $to:ty),+ $(,)?) => {
        $(
            impl Upcast<$from> for $to {
                fn upcast(value: $from) -> $to {
                    value as $to
                }
            }
        )+
    };
}

impl_upcast!(
    i16 => i32,
    i16 => i64,
    i32 => i64,
    i32 => f32,
    i32 => f64,
    i64 => f64,
    u16 => u32,
    u32 => u64,
    u32 => f64,
    u64 => f64,
    f32 => f64,
    f64 => f32,
);

struct ConvertingWritable<PT, CT: EdgeItem> {
    inner: WritableHandle<CT>,
    _marker: PhantomData<fn(PT)>,
}

#[async_trait]
impl<PT, CT> WritableEdge<PT> for ConvertingWritable<PT, CT>
where
    PT: EdgeItem,
    CT: EdgeItem + Upcast<PT>,
{
    async fn await_write(&self, value: PT) -> Status {
        self.inner.await_write(CT::upcast(value)).await
    }
}

/// Wraps a writable half of item type `CT` as one of item type `PT`.
/// Releasing the wrapper releases the wrapped half.
pub(crate) fn convert_writable<PT, CT>(inner: WritableHandle<CT>) -> WritableHandle<PT>
where
    PT: EdgeItem,
    CT: EdgeItem + Upcast<PT>,
{
    WritableHandle::new(Arc::new(ConvertingWritable::<PT, CT> {
        inner,
        _marker: PhantomData,
    }))
}

struct ConvertingReadable<PT: EdgeItem, CT> {
    inner: ReadableHandle<PT>,
    _marker: PhantomData<fn() -> CT>,
}

#[async_trait]
impl<PT, CT> ReadableEdge<CT> for ConvertingReadable<PT, CT>
where
    PT: EdgeItem,
    CT: EdgeItem + Upcast<PT>,
{
    async fn await_read(&self) -> Read<CT> {
        match self.inner.await_read().await {
            Read::Item(value) => Read::Item(CT::upcast(value)),
            Read::Closed => Read::Closed,
            Read::Timeout => Read::Timeout,
            Read::Error => Read::Error,
        }
    }
}

pub(crate) fn convert_readable<PT, CT>(inner: ReadableHandle<PT>) -> ReadableHandle<CT>
where
    PT: EdgeItem,
    CT: EdgeItem + Upcast<PT>,
{
    ReadableHandle::new(Arc::new(ConvertingReadable::<PT, CT> {
        inner,
        _marker: PhantomData,
    }))
}
