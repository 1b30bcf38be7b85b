//! Node capability traits and the endpoint sum-traits consumed by the
//! edge builder.
//!
//! A concrete endpoint advertises its capabilities by returning handles
//! from [`Producer`] / [`Consumer`]; the builder picks the compatible
//! pair. Capabilities come in four kinds:
//!
//! - [`WritableProvider`]: offers a writable half that others write into
//!   (a sink owning a channel, or a push component).
//! - [`WritableAcceptor`]: accepts a writable half it will write into
//!   (a source or an operator's downstream side).
//! - [`ReadableProvider`]: offers a readable half others read from
//!   (a source owning a channel, or a pull component).
//! - [`ReadableAcceptor`]: accepts a readable half it will read from
//!   (a sink's upstream side).

use std::sync::Arc;

use crate::edge::{EdgeItem, ReadableHandle, WritableHandle};
use crate::error::FlowError;

pub trait WritableProvider<T: EdgeItem>: Send + Sync {
    fn writable_edge(&self) -> Result<WritableHandle<T>, FlowError>;
}

pub trait WritableAcceptor<T: EdgeItem>: Send + Sync {
    /// Cheap occupancy probe so the builder can refuse before the
    /// provider side has issued (and would otherwise release) a half.
    fn ready_to_accept(&self) -> Result<(), FlowError> {
        Ok(())
    }

    fn accept_writable(&self, edge: WritableHandle<T>) -> Result<(), FlowError>;
}

pub trait ReadableProvider<T: EdgeItem>: Send + Sync {
    fn readable_edge(&self) -> Result<ReadableHandle<T>, FlowError>;
}

pub trait ReadableAcceptor<T: EdgeItem>: Send + Sync {
    fn ready_to_accept(&self) -> Result<(), FlowError> {
        Ok(())
    }

    fn accept_readable(&self, edge: ReadableHandle<T>) -> Result<(), FlowError>;
}

/// Upstream endpoint of a prospective edge.
pub trait Producer<T: EdgeItem>: Send + Sync {
    fn writable_acceptor(&self) -> Option<Arc<dyn WritableAcceptor<T>>> {
        None
    }

    fn readable_provider(&self) -> Option<Arc<dyn ReadableProvider<T>>> {
        None
    }
}

/// Downstream endpoint of a prospective edge.
pub trait Consumer<T: EdgeItem>: Send + Sync {
    fn writable_provider(&self) -> Option<Arc<dyn WritableProvider<T>>> {
        None
    }

    fn readable_acceptor(&self) -> Option<Arc<dyn ReadableAcceptor<T>>> {
        None
    }
}
