//! Broadcast whose value type is not fixed at construction.
//!
//! The operator stays *pending* until the first typed neighbor is
//! connected; that connection fixes the concrete item type, which then
//! propagates transitively through any chained pending typeless peers
//! in both directions. A later neighbor carrying a different type fails
//! with `TypeMismatch`.

use std::any::{type_name, Any, TypeId};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::caps::{Consumer, Producer, WritableAcceptor, WritableProvider};
use crate::edge::{EdgeItem, Ledger, WritableHandle};
use crate::error::FlowError;
use crate::ops::broadcast::{BroadcastInner, BroadcastProvider};

pub struct BroadcastTypeless {
    shared: Arc<TypelessShared>,
}

impl BroadcastTypeless {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(TypelessShared {
                state: Mutex::new(TypelessState::Pending {
                    downstream: Vec::new(),
                    upstream: Vec::new(),
                }),
            }),
        }
    }

    /// Item type the operator resolved to, if any neighbor fixed one.
    pub fn resolved_type(&self) -> Option<&'static str> {
        self.shared.resolved().map(|r| r.type_name)
    }
}

impl Default for BroadcastTypeless {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BroadcastTypeless {
    fn drop(&mut self) {
        if let Some(resolved) = self.shared.resolved() {
            resolved.ledger.abort_if_connected("BroadcastTypeless");
        }
    }
}

pub(crate) struct TypelessShared {
    state: Mutex<TypelessState>,
}

enum TypelessState {
    Pending {
        downstream: Vec<(Arc<TypelessShared>, Arc<TypelessLink>)>,
        upstream: Vec<(Arc<TypelessShared>, Arc<TypelessLink>)>,
    },
    Resolved(ResolvedBroadcast),
}

/// Dedup marker shared by the two endpoints of a pending typeless
/// link, so resolution arriving from either side wires the inner edge
/// exactly once.
#[derive(Default)]
struct TypelessLink {
    wired: AtomicBool,
}

#[derive(Clone)]
struct ResolvedBroadcast {
    type_id: TypeId,
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
    ledger: Arc<Ledger>,
    wire_down: fn(&ResolvedBroadcast, &Arc<TypelessShared>) -> Result<(), FlowError>,
    wire_up: fn(&ResolvedBroadcast, &Arc<TypelessShared>) -> Result<(), FlowError>,
}

impl TypelessShared {
    fn resolved(&self) -> Option<ResolvedBroadcast> {
        match &*self.state.lock().expect("typeless broadcast lock") {
            TypelessState::Resolved(resolved) => Some(resolved.clone()),
            TypelessState::Pending { .. } => None,
        }
    }

    fn push_downstream(&self, peer: &Arc<TypelessShared>, link: &Arc<TypelessLink>) -> bool {
        match &mut *self.state.lock().expect("typeless broadcast lock") {
            TypelessState::Pending { downstream, .. } => {
                downstream.push((Arc::clone(peer), Arc::clone(link)));
                true
            }
            TypelessState::Resolved(_) => false,
        }
    }

    fn push_upstream(&self, peer: &Arc<TypelessShared>, link: &Arc<TypelessLink>) -> bool {
        match &mut *self.state.lock().expect("typeless broadcast lock") {
            TypelessState::Pending { upstream, .. } => {
                upstream.push((Arc::clone(peer), Arc::clone(link)));
                true
            }
            TypelessState::Resolved(_) => false,
        }
    }
}

fn resolve<T: EdgeItem + Clone>(
    shared: &Arc<TypelessShared>,
) -> Result<Arc<BroadcastInner<T>>, FlowError> {
    let (inner, pending_down, pending_up) = {
        let mut state = shared.state.lock().expect("typeless broadcast lock");
        match &mut *state {
            TypelessState::Resolved(resolved) => {
                if resolved.type_id != TypeId::of::<T>() {
                    return Err(FlowError::TypeMismatch {
                        produced: type_name::<T>(),
                        expected: resolved.type_name,
                    });
                }
                return Ok(Arc::clone(&resolved.inner)
                    .downcast::<BroadcastInner<T>>()
                    .expect("type tag already checked"));
            }
            TypelessState::Pending {
                downstream,
                upstream,
            } => {
                let inner = Arc::new(BroadcastInner::<T>::new());
                let down = std::mem::take(downstream);
                let up = std::mem::take(upstream);
                *state = TypelessState::Resolved(ResolvedBroadcast {
                    type_id: TypeId::of::<T>(),
                    type_name: type_name::<T>(),
                    ledger: inner.ledger_arc(),
                    inner: Arc::clone(&inner) as Arc<dyn Any + Send + Sync>,
                    wire_down: wire_down::<T>,
                    wire_up: wire_up::<T>,
                });
                (inner, down, up)
            }
        }
    };

    // Propagate the freshly fixed type through chained typeless peers.
    for (peer, link) in pending_down {
        if link.wired.swap(true, Ordering::SeqCst) {
            continue;
        }
        let peer_inner = resolve::<T>(&peer)?;
        let edge = BroadcastProvider { inner: peer_inner }.writable_edge()?;
        inner.accept_writable(edge)?;
    }
    for (peer, link) in pending_up {
        if link.wired.swap(true, Ordering::SeqCst) {
            continue;
        }
        let peer_inner = resolve::<T>(&peer)?;
        let edge = BroadcastProvider {
            inner: Arc::clone(&inner),
        }
        .writable_edge()?;
        peer_inner.accept_writable(edge)?;
    }
    Ok(inner)
}

fn wire_down<T: EdgeItem + Clone>(
    resolved: &ResolvedBroadcast,
    peer: &Arc<TypelessShared>,
) -> Result<(), FlowError> {
    let inner = Arc::clone(&resolved.inner)
        .downcast::<BroadcastInner<T>>()
        .expect("resolved type tag");
    let peer_inner = resolve::<T>(peer)?;
    let edge = BroadcastProvider { inner: peer_inner }.writable_edge()?;
    inner.accept_writable(edge)
}

fn wire_up<T: EdgeItem + Clone>(
    resolved: &ResolvedBroadcast,
    peer: &Arc<TypelessShared>,
) -> Result<(), FlowError> {
    let inner = Arc::clone(&resolved.inner)
        .downcast::<BroadcastInner<T>>()
        .expect("resolved type tag");
    let peer_inner = resolve::<T>(peer)?;
    let edge = BroadcastProvider { inner }.writable_edge()?;
    peer_inner.accept_writable(edge)
}

/// Chains two typeless broadcasts before either has a fixed type. If
/// one side is already resolved, its type propagates to the other side
/// immediately.
pub fn link_typeless(
    upstream: &BroadcastTypeless,
    downstream: &BroadcastTypeless,
) -> Result<(), FlowError> {
    loop {
        match (upstream.shared.resolved(), downstream.shared.resolved()) {
            (Some(up), Some(down)) => {
                if up.type_id != down.type_id {
                    return Err(FlowError::TypeMismatch {
                        produced: up.type_name,
                        expected: down.type_name,
                    });
                }
                return (up.wire_down)(&up, &downstream.shared);
            }
            (Some(up), None) => return (up.wire_down)(&up, &downstream.shared),
            (None, Some(down)) => return (down.wire_up)(&down, &upstream.shared),
            (None, None) => {
                let link = Arc::new(TypelessLink::default());
                if !upstream.shared.push_downstream(&downstream.shared, &link) {
                    continue;
                }
                if !downstream.shared.push_upstream(&upstream.shared, &link) {
                    // Downstream resolved concurrently; wire directly
                    // unless its resolution already consumed the link.
                    if let Some(down) = downstream.shared.resolved() {
                        if link.wired.swap(true, Ordering::SeqCst) {
                            return Ok(());
                        }
                        return (down.wire_up)(&down, &upstream.shared);
                    }
                    continue;
                }
                return Ok(());
            }
        }
    }
}

struct TypelessAcceptor<T: EdgeItem + Clone> {
    shared: Arc<TypelessShared>,
    _marker: PhantomData<fn(T)>,
}

impl<T: EdgeItem + Clone> WritableAcceptor<T> for TypelessAcceptor<T> {
    fn accept_writable(&self, edge: WritableHandle<T>) -> Result<(), FlowError> {
        resolve::<T>(&self.shared)?.accept_writable(edge)
    }
}

struct TypelessProvider<T: EdgeItem + Clone> {
    shared: Arc<TypelessShared>,
    _marker: PhantomData<fn(T)>,
}

impl<T: EdgeItem + Clone> WritableProvider<T> for TypelessProvider<T> {
    fn writable_edge(&self) -> Result<WritableHandle<T>, FlowError> {
        let inner = resolve::<T>(&self.shared)?;
        BroadcastProvider { inner }.writable_edge()
    }
}

impl<T: EdgeItem + Clone> Producer<T> for BroadcastTypeless {
    fn writable_acceptor(&self) -> Option<Arc<dyn WritableAcceptor<T>>> {
        Some(Arc::new(TypelessAcceptor::<T> {
            shared: Arc::clone(&self.shared),
            _marker: PhantomData,
        }))
    }
}

impl<T: EdgeItem + Clone> Consumer<T> for BroadcastTypeless {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        Some(Arc::new(TypelessProvider::<T> {
            shared: Arc::clone(&self.shared),
            _marker: PhantomData,
        }))
    }
}
