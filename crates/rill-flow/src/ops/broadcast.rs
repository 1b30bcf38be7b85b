//! Fan-out operator: every value written upstream is delivered to each
//! connected downstream edge.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rill_core::Status;

use crate::caps::{Consumer, Producer, WritableAcceptor, WritableProvider};
use crate::edge::{EdgeItem, Ledger, WritableEdge, WritableHandle};
use crate::error::FlowError;

/// Typed broadcast. Accepts any number of downstream edges and hands
/// out any number of upstream writer halves.
///
/// `await_write` aggregates the per-edge statuses: any `Error` wins,
/// `Closed` is reported only once every downstream edge has closed
/// (or none is connected), otherwise `Success`. When the last upstream
/// writer releases, all downstream edges are released.
pub struct Broadcast<T: EdgeItem + Clone> {
    inner: Arc<BroadcastInner<T>>,
}

impl<T: EdgeItem + Clone> Broadcast<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BroadcastInner::new()),
        }
    }
}

impl<T: EdgeItem + Clone> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct BroadcastInner<T: EdgeItem> {
    state: Mutex<BroadcastState<T>>,
    ledger: Arc<Ledger>,
}

struct BroadcastState<T: EdgeItem> {
    downstream: Vec<WritableHandle<T>>,
    upstream_live: usize,
}

impl<T: EdgeItem> BroadcastInner<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BroadcastState {
                downstream: Vec::new(),
                upstream_live: 0,
            }),
            ledger: Arc::new(Ledger::default()),
        }
    }

    pub(crate) fn ledger_arc(&self) -> Arc<Ledger> {
        Arc::clone(&self.ledger)
    }
}

#[async_trait]
impl<T: EdgeItem + Clone> WritableEdge<T> for BroadcastInner<T> {
    async fn await_write(&self, value: T) -> Status {
        let edges: Vec<Arc<dyn WritableEdge<T>>> = {
            let state = self.state.lock().expect("broadcast lock");
            state.downstream.iter().map(|h| h.edge()).collect()
        };
        if edges.is_empty() {
            return Status::Closed;
        }

        let count = edges.len();
        let mut value = Some(value);
        let mut any_error = false;
        let mut all_closed = true;
        let mut closed: Vec<Arc<dyn WritableEdge<T>>> = Vec::new();
        for (index, edge) in edges.iter().enumerate() {
            let item = if index + 1 == count {
                value.take().expect("broadcast value consumed early")
            } else {
                value.as_ref().expect("broadcast value consumed early").clone()
            };
            match edge.await_write(item).await {
                Status::Closed => closed.push(Arc::clone(edge)),
                Status::Error => {
                    any_error = true;
                    all_closed = false;
                }
                _ => all_closed = false,
            }
        }

        if !closed.is_empty() {
            // Disconnected consumers are forgotten so later writes do not
            // keep paying for them.
            let dropped = {
                let mut state = self.state.lock().expect("broadcast lock");
                let mut kept = Vec::with_capacity(state.downstream.len());
                let mut dropped = Vec::new();
                for handle in state.downstream.drain(..) {
                    if closed.iter().any(|c| Arc::ptr_eq(&handle.edge(), c)) {
                        dropped.push(handle);
                    } else {
                        kept.push(handle);
                    }
                }
                state.downstream = kept;
                dropped
            };
            drop(dropped);
        }

        if any_error {
            Status::Error
        } else if all_closed {
            Status::Closed
        } else {
            Status::Success
        }
    }
}

impl<T: EdgeItem> WritableAcceptor<T> for BroadcastInner<T> {
    fn accept_writable(&self, edge: WritableHandle<T>) -> Result<(), FlowError> {
        self.state
            .lock()
            .expect("broadcast lock")
            .downstream
            .push(edge);
        Ok(())
    }
}

pub(crate) struct BroadcastProvider<T: EdgeItem> {
    pub(crate) inner: Arc<BroadcastInner<T>>,
}

impl<T: EdgeItem + Clone> WritableProvider<T> for BroadcastProvider<T> {
    fn writable_edge(&self) -> Result<WritableHandle<T>, FlowError> {
        {
            let mut state = self.inner.state.lock().expect("broadcast lock");
            state.upstream_live += 1;
        }
        let release = Ledger::issue(&self.inner.ledger);
        let inner = Arc::clone(&self.inner);
        Ok(
            WritableHandle::new(Arc::clone(&self.inner) as Arc<dyn WritableEdge<T>>)
                .with_release(release)
                .with_release(move || {
                    let drained = {
                        let mut state = inner.state.lock().expect("broadcast lock");
                        state.upstream_live -= 1;
                        if state.upstream_live == 0 {
                            std::mem::take(&mut state.downstream)
                        } else {
                            Vec::new()
                        }
                    };
                    // Last upstream writer gone: release the downstream
                    // halves outside the lock.
                    drop(drained);
                }),
        )
    }
}

impl<T: EdgeItem + Clone> Producer<T> for Broadcast<T> {
    fn writable_acceptor(&self) -> Option<Arc<dyn WritableAcceptor<T>>> {
        Some(self.inner.clone())
    }
}

impl<T: EdgeItem + Clone> Consumer<T> for Broadcast<T> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        Some(Arc::new(BroadcastProvider {
            inner: self.inner.clone(),
        }))
    }
}

impl<T: EdgeItem + Clone> Drop for Broadcast<T> {
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("Broadcast");
    }
}
