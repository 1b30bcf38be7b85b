//! Two-input combine-latest: emits a tuple on every input update once
//! both slots have seen at least one value.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rill_core::Status;

use crate::caps::{Consumer, Producer, WritableAcceptor, WritableProvider};
use crate::edge::{EdgeItem, Ledger, WritableEdge, WritableHandle};
use crate::error::FlowError;

/// Latest-per-slot cache over two inputs, one `(A, B)` output.
///
/// Closure rule: the downstream half is released when *all* inputs have
/// released; an error from the downstream write propagates to the
/// writing input.
pub struct CombineLatest2<A, B>
where
    A: EdgeItem + Clone,
    B: EdgeItem + Clone,
{
    inner: Arc<CombineInner<A, B>>,
}

struct CombineInner<A: EdgeItem, B: EdgeItem> {
    state: Mutex<CombineState<A, B>>,
    ledger: Arc<Ledger>,
}

struct CombineState<A: EdgeItem, B: EdgeItem> {
    latest_a: Option<A>,
    latest_b: Option<B>,
    issued_a: bool,
    issued_b: bool,
    open_inputs: usize,
    downstream_connected: bool,
    downstream: Option<WritableHandle<(A, B)>>,
}

impl<A, B> CombineLatest2<A, B>
where
    A: EdgeItem + Clone,
    B: EdgeItem + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CombineInner {
                state: Mutex::new(CombineState {
                    latest_a: None,
                    latest_b: None,
                    issued_a: false,
                    issued_b: false,
                    open_inputs: 0,
                    downstream_connected: false,
                    downstream: None,
                }),
                ledger: Arc::new(Ledger::default()),
            }),
        }
    }

    /// Consumer endpoint for the first input slot.
    pub fn sink_a(&self) -> CombineSinkA<A, B> {
        CombineSinkA {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Consumer endpoint for the second input slot.
    pub fn sink_b(&self) -> CombineSinkB<A, B> {
        CombineSinkB {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, B> Default for CombineLatest2<A, B>
where
    A: EdgeItem + Clone,
    B: EdgeItem + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A: EdgeItem + Clone, B: EdgeItem + Clone> CombineInner<A, B> {
    async fn emit_if_ready(&self) -> Status {
        let (tuple, edge) = {
            let state = self.state.lock().expect("combine latest lock");
            let tuple = match (&state.latest_a, &state.latest_b) {
                (Some(a), Some(b)) => Some((a.clone(), b.clone())),
                _ => None,
            };
            (tuple, state.downstream.as_ref().map(|handle| handle.edge()))
        };
        match (tuple, edge) {
            (Some(tuple), Some(edge)) => edge.await_write(tuple).await,
            (Some(_), None) => Status::Closed,
            (None, _) => Status::Success,
        }
    }

    fn release_input(&self) {
        let drained = {
            let mut state = self.state.lock().expect("combine latest lock");
            state.open_inputs -= 1;
            if state.open_inputs == 0 {
                state.downstream.take()
            } else {
                None
            }
        };
        drop(drained);
    }
}

struct InputA<A: EdgeItem, B: EdgeItem> {
    inner: Arc<CombineInner<A, B>>,
}

#[async_trait]
impl<A: EdgeItem + Clone, B: EdgeItem + Clone> WritableEdge<A> for InputA<A, B> {
    async fn await_write(&self, value: A) -> Status {
        self.inner.state.lock().expect("combine latest lock").latest_a = Some(value);
        self.inner.emit_if_ready().await
    }
}

struct InputB<A: EdgeItem, B: EdgeItem> {
    inner: Arc<CombineInner<A, B>>,
}

#[async_trait]
impl<A: EdgeItem + Clone, B: EdgeItem + Clone> WritableEdge<B> for InputB<A, B> {
    async fn await_write(&self, value: B) -> Status {
        self.inner.state.lock().expect("combine latest lock").latest_b = Some(value);
        self.inner.emit_if_ready().await
    }
}

pub struct CombineSinkA<A: EdgeItem + Clone, B: EdgeItem + Clone> {
    inner: Arc<CombineInner<A, B>>,
}

impl<A: EdgeItem + Clone, B: EdgeItem + Clone> WritableProvider<A> for CombineSinkA<A, B> {
    fn writable_edge(&self) -> Result<WritableHandle<A>, FlowError> {
        {
            let mut state = self.inner.state.lock().expect("combine latest lock");
            if state.issued_a {
                return Err(FlowError::AlreadyConnected);
            }
            state.issued_a = true;
            state.open_inputs += 1;
        }
        let release = Ledger::issue(&self.inner.ledger);
        let inner = Arc::clone(&self.inner);
        Ok(WritableHandle::new(Arc::new(InputA {
            inner: Arc::clone(&self.inner),
        }) as Arc<dyn WritableEdge<A>>)
        .with_release(release)
        .with_release(move || inner.release_input()))
    }
}

impl<A: EdgeItem + Clone, B: EdgeItem + Clone> Consumer<A> for CombineSinkA<A, B> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<A>>> {
        Some(Arc::new(CombineSinkA {
            inner: Arc::clone(&self.inner),
        }))
    }
}

pub struct CombineSinkB<A: EdgeItem + Clone, B: EdgeItem + Clone> {
    inner: Arc<CombineInner<A, B>>,
}

impl<A: EdgeItem + Clone, B: EdgeItem + Clone> WritableProvider<B> for CombineSinkB<A, B> {
    fn writable_edge(&self) -> Result<WritableHandle<B>, FlowError> {
        {
            let mut state = self.inner.state.lock().expect("combine latest lock");
            if state.issued_b {
                return Err(FlowError::AlreadyConnected);
            }
            state.issued_b = true;
            state.open_inputs += 1;
        }
        let release = Ledger::issue(&self.inner.ledger);
        let inner = Arc::clone(&self.inner);
        Ok(WritableHandle::new(Arc::new(InputB {
            inner: Arc::clone(&self.inner),
        }) as Arc<dyn WritableEdge<B>>)
        .with_release(release)
        .with_release(move || inner.release_input()))
    }
}

impl<A: EdgeItem + Clone, B: EdgeItem + Clone> Consumer<B> for CombineSinkB<A, B> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<B>>> {
        Some(Arc::new(CombineSinkB {
            inner: Arc::clone(&self.inner),
        }))
    }
}

impl<A, B> Producer<(A, B)> for CombineLatest2<A, B>
where
    A: EdgeItem + Clone,
    B: EdgeItem + Clone,
{
    fn writable_acceptor(&self) -> Option<Arc<dyn WritableAcceptor<(A, B)>>> {
        Some(self.inner.clone())
    }
}

impl<A: EdgeItem + Clone, B: EdgeItem + Clone> WritableAcceptor<(A, B)> for CombineInner<A, B> {
    fn ready_to_accept(&self) -> Result<(), FlowError> {
        if self
            .state
            .lock()
            .expect("combine latest lock")
            .downstream_connected
        {
            return Err(FlowError::AlreadyConnected);
        }
        Ok(())
    }

    fn accept_writable(&self, edge: WritableHandle<(A, B)>) -> Result<(), FlowError> {
        let mut state = self.state.lock().expect("combine latest lock");
        if state.downstream_connected {
            return Err(FlowError::AlreadyConnected);
        }
        state.downstream_connected = true;
        state.downstream = Some(edge);
        Ok(())
    }
}

impl<A, B> Drop for CombineLatest2<A, B>
where
    A: EdgeItem + Clone,
    B: EdgeItem + Clone,
{
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("CombineLatest2");
    }
}
