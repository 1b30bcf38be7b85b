//! Key-based demultiplexer: one writable upstream half, a dynamically
//! grown table of per-key downstream routes.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rill_core::Status;
use tracing::warn;

use crate::caps::{Consumer, Producer, WritableAcceptor, WritableProvider};
use crate::edge::{EdgeItem, Ledger, WritableEdge, WritableHandle};
use crate::error::FlowError;

/// What the router does with a value whose key has no connected route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownKeyPolicy {
    /// Drop the value, log a warning, keep the stream running.
    #[default]
    DropWithWarning,
    /// Report `Status::Error` to the writer.
    Fail,
}

pub trait RouteKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<K: Clone + Eq + Hash + Debug + Send + Sync + 'static> RouteKey for K {}

pub struct Router<K: RouteKey, T: EdgeItem> {
    inner: Arc<RouterInner<K, T>>,
}

struct RouterInner<K: RouteKey, T: EdgeItem> {
    key_of: Box<dyn Fn(&T) -> K + Send + Sync>,
    policy: UnknownKeyPolicy,
    routes: Mutex<HashMap<K, Option<WritableHandle<T>>>>,
    upstream_issued: AtomicBool,
    ledger: Arc<Ledger>,
}

impl<K: RouteKey, T: EdgeItem> Router<K, T> {
    pub fn new(key_of: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        Self::with_policy(key_of, UnknownKeyPolicy::default())
    }

    pub fn with_policy(
        key_of: impl Fn(&T) -> K + Send + Sync + 'static,
        policy: UnknownKeyPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                key_of: Box::new(key_of),
                policy,
                routes: Mutex::new(HashMap::new()),
                upstream_issued: AtomicBool::new(false),
                ledger: Arc::new(Ledger::default()),
            }),
        }
    }

    /// Provider half for key `key`, creating the route entry if absent.
    pub fn source(&self, key: K) -> RouterSource<K, T> {
        self.inner
            .routes
            .lock()
            .expect("router routes lock")
            .entry(key.clone())
            .or_insert(None);
        RouterSource {
            key,
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl<K: RouteKey, T: EdgeItem> WritableEdge<T> for RouterInner<K, T> {
    async fn await_write(&self, value: T) -> Status {
        let key = (self.key_of)(&value);
        let edge = {
            let routes = self.routes.lock().expect("router routes lock");
            routes
                .get(&key)
                .and_then(|slot| slot.as_ref())
                .map(|handle| handle.edge())
        };
        match edge {
            Some(edge) => edge.await_write(value).await,
            None => match self.policy {
                UnknownKeyPolicy::DropWithWarning => {
                    warn!(key = ?key, "router dropping value for unknown key");
                    Status::Success
                }
                UnknownKeyPolicy::Fail => Status::Error,
            },
        }
    }
}

struct RouterUpstreamProvider<K: RouteKey, T: EdgeItem> {
    inner: Arc<RouterInner<K, T>>,
}

impl<K: RouteKey, T: EdgeItem> WritableProvider<T> for RouterUpstreamProvider<K, T> {
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
                    // Upstream done: release every connected route.
                    let drained: Vec<WritableHandle<T>> = {
                        let mut routes = inner.routes.lock().expect("router routes lock");
                        routes.values_mut().filter_map(|slot| slot.take()).collect()
                    };
                    drop(drained);
                }),
        )
    }
}

impl<K: RouteKey, T: EdgeItem> Consumer<T> for Router<K, T> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        Some(Arc::new(RouterUpstreamProvider {
            inner: self.inner.clone(),
        }))
    }
}

impl<K: RouteKey, T: EdgeItem> Drop for Router<K, T> {
    fn drop(&mut self) {
        self.inner.ledger.abort_if_connected("Router");
    }
}

/// Per-key producer endpoint returned by [`Router::source`].
pub struct RouterSource<K: RouteKey, T: EdgeItem> {
    key: K,
    inner: Arc<RouterInner<K, T>>,
}

struct RouterSourceAcceptor<K: RouteKey, T: EdgeItem> {
    key: K,
    inner: Arc<RouterInner<K, T>>,
}

impl<K: RouteKey, T: EdgeItem> WritableAcceptor<T> for RouterSourceAcceptor<K, T> {
    fn ready_to_accept(&self) -> Result<(), FlowError> {
        let routes = self.inner.routes.lock().expect("router routes lock");
        match routes.get(&self.key) {
            Some(Some(_)) => Err(FlowError::AlreadyConnected),
            _ => Ok(()),
        }
    }

    fn accept_writable(&self, edge: WritableHandle<T>) -> Result<(), FlowError> {
        let mut routes = self.inner.routes.lock().expect("router routes lock");
        let slot = routes.entry(self.key.clone()).or_insert(None);
        if slot.is_some() {
            return Err(FlowError::AlreadyConnected);
        }
        *slot = Some(edge);
        Ok(())
    }
}

impl<K: RouteKey, T: EdgeItem> Producer<T> for RouterSource<K, T> {
    fn writable_acceptor(&self) -> Option<Arc<dyn WritableAcceptor<T>>> {
        Some(Arc::new(RouterSourceAcceptor {
            key: self.key.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }
}
