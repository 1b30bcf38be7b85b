//! Port manifolds and the context handed to segment initializers.
//!
//! A manifold is the per-port interconnect between segments. Only the
//! load-balancing kind exists at this layer: a work-stealing queue the
//! egress side writes into and the ingress side reads from. The first
//! segment to touch a port fixes its item type; later segments with a
//! different type fail synchronously.

use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rill_flow::{Consumer, EdgeItem, Producer, Queue, ReadableProvider, WritableProvider};

use crate::error::ExecError;
use crate::pipeline::SegmentDefinition;

pub(crate) struct Manifold {
    type_id: TypeId,
    type_name: &'static str,
    queue: Box<dyn Any + Send + Sync>,
    close: fn(&(dyn Any + Send + Sync)),
}

fn close_queue<T: EdgeItem>(queue: &(dyn Any + Send + Sync)) {
    if let Some(queue) = queue.downcast_ref::<Queue<T>>() {
        queue.close();
    }
}

impl Manifold {
    fn for_item<T: EdgeItem>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            queue: Box::new(Queue::<T>::new()),
            close: close_queue::<T>,
        }
    }

    fn queue<T: EdgeItem>(&self, port: &str, segment: &str) -> Result<&Queue<T>, ExecError> {
        if self.type_id != TypeId::of::<T>() {
            return Err(ExecError::PortType {
                port: port.to_string(),
                segment: segment.to_string(),
                carried: self.type_name,
                requested: type_name::<T>(),
            });
        }
        Ok(self
            .queue
            .downcast_ref::<Queue<T>>()
            .expect("type id already checked"))
    }

    pub(crate) fn close(&self) {
        (self.close)(self.queue.as_ref());
    }
}

/// Egress endpoint of a port: a [`Consumer`] the segment's terminal
/// producer is wired into with `make_edge`.
pub struct PortEgress<T: EdgeItem> {
    provider: Arc<dyn WritableProvider<T>>,
}

impl<T: EdgeItem> Consumer<T> for PortEgress<T> {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        Some(Arc::clone(&self.provider))
    }
}

/// Ingress endpoint of a port: a [`Producer`] the segment's first
/// consumer is wired from with `make_edge`.
pub struct PortIngress<T: EdgeItem> {
    provider: Arc<dyn ReadableProvider<T>>,
}

impl<T: EdgeItem> Producer<T> for PortIngress<T> {
    fn readable_provider(&self) -> Option<Arc<dyn ReadableProvider<T>>> {
        Some(Arc::clone(&self.provider))
    }
}

pub(crate) type SegmentTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build-time view a segment initializer uses to reach its declared
/// ports and hand its node tasks to the pipeline manager.
pub struct SegmentContext<'a> {
    segment: &'a SegmentDefinition,
    manifolds: &'a mut BTreeMap<String, Manifold>,
    tasks: Vec<SegmentTask>,
}

impl<'a> SegmentContext<'a> {
    pub(crate) fn new(
        segment: &'a SegmentDefinition,
        manifolds: &'a mut BTreeMap<String, Manifold>,
    ) -> Self {
        Self {
            segment,
            manifolds,
            tasks: Vec::new(),
        }
    }

    pub fn segment_name(&self) -> &str {
        self.segment.name()
    }

    /// Writable side of a declared egress port.
    pub fn egress<T: EdgeItem>(&mut self, port: &str) -> Result<PortEgress<T>, ExecError> {
        if !self.segment.egress_ports().iter().any(|p| p == port) {
            return Err(ExecError::UnknownPort {
                segment: self.segment.name().to_string(),
                port: port.to_string(),
            });
        }
        let queue = self.manifold_queue::<T>(port)?;
        let provider = queue
            .writable_provider()
            .expect("queue always provides a writable half");
        Ok(PortEgress { provider })
    }

    /// Readable side of a declared ingress port.
    pub fn ingress<T: EdgeItem>(&mut self, port: &str) -> Result<PortIngress<T>, ExecError> {
        if !self.segment.ingress_ports().iter().any(|p| p == port) {
            return Err(ExecError::UnknownPort {
                segment: self.segment.name().to_string(),
                port: port.to_string(),
            });
        }
        let queue = self.manifold_queue::<T>(port)?;
        let provider = queue
            .readable_provider()
            .expect("queue always provides a readable half");
        Ok(PortIngress { provider })
    }

    /// Registers a node task; the manager spawns it once every assigned
    /// segment of the pipeline has been built.
    pub fn spawn(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks.push(Box::pin(task));
    }

    pub(crate) fn into_tasks(self) -> Vec<SegmentTask> {
        self.tasks
    }

    fn manifold_queue<T: EdgeItem>(&mut self, port: &str) -> Result<&Queue<T>, ExecError> {
        let manifold = self
            .manifolds
            .entry(port.to_string())
            .or_insert_with(Manifold::for_item::<T>);
        manifold.queue::<T>(port, self.segment.name())
    }
}
