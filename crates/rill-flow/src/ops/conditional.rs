//! Forwarding filter: values satisfying the predicate pass through,
//! others are silently dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rill_core::Status;

use crate::caps::{Consumer, Producer, WritableAcceptor, WritableProvider};
use crate::edge::{EdgeItem, Ledger, WritableEdge, WritableHandle};
use crate::error::FlowError;

pub struct Conditional<T: EdgeItem> {
    inner: Arc<ConditionalInner<T>>,
}

struct ConditionalInner<T: EdgeItem> {
    predicate: Box<dyn Fn(&T) -> bool + Send + Sync>,
    downstream: Mutex<Option<WritableHandle<T>>>,
    upstream_issued: AtomicBool,
    downstream_connected: AtomicBool,
    ledger: Arc<Ledger>,
}

impl<T: EdgeItem> Conditional<T> {
    pub fn new(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ConditionalInner {
                predicate: Box::new(predicate),
                downstream: Mutex::new(None),
                upstream_issued: AtomicBool::new(false),
                downstream_connected: AtomicBool::new(false),
                ledger: Arc::new(Ledger::default()),
            }),
        }
    }
}

#[async_trait]
impl<T: EdgeItem> WritableEdge<T> for ConditionalInner<T> {
    async fn await_write(&self, value: T) -> Status {
        if !(self.predicate)(&value) {
            return Status::Success;
        }
        let edge = self
            .downstream
            .lock()
            .expect("conditional downstream lock")
            .as_ref()
            .map(|handle| handle.edge());
        match edge {
            Some(edge) => edge.await_write(value).await,
            None => Status::Closed,
        }
    }
}

struct ConditionalProvider<T: EdgeItem> {
    inner: Arc<ConditionalInner<T>>,
}

impl<T: EdgeItem> WritableProvider<T> for ConditionalProvider<T> {
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
                    inner
                        .downstream
                        .lock()
                        .expect("conditional downstream lock")
                        .take();
                }),
        )
    }
}

impl<T: EdgeItem> WritableAcceptor<T> for ConditionalInner<T> {
    fn ready_to_accept(&self) -> Result<(), FlowError> {
        if self.downstream_connected.load(Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        Ok(())
    }

    fn accept_writable(&self, edge: WritableHandle<T>) -> Result<(), FlowError> {
        if self.downstream_connected.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyConnected);
        }
        *self
            .downstream
            .lock()
            .expect("conditional downstream lock") = Some(edge);
        Ok(())
    }
}

impl<T: EdgeItem> Producer<T> for Conditional<T> {
    fn writable_acceptor(&self) -> Option<Arc<dyn WritableAcceptor<T>>> {
        Some(self.inner.clone())
    }
}

impl<T: EdgeItem> Consumer<T> for Conditional<T> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        Some(Arc::new(ConditionalProvider {
            inner: self.inner.clone(),
        }))
    }
}

impl<T: EdgeItem> Drop for Conditional<T> {
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("Conditional");
    }
}
