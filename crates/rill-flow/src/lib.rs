//! Typed dataflow fabric: channels, edges, the edge builder, and the
//! node/operator zoo that pipelines are assembled from.

pub mod builder;
pub mod caps;
pub mod channel;
pub mod edge;
pub mod error;
pub mod node;
pub mod ops;

pub use builder::{make_edge, make_edge_converting, make_edge_typeless};
pub use caps::{
    Consumer, Producer, ReadableAcceptor, ReadableProvider, WritableAcceptor, WritableProvider,
};
pub use channel::{Channel, Read, DEFAULT_CHANNEL_CAPACITY};
pub use edge::{EdgeItem, ReadableHandle, Upcast, WritableHandle};
pub use error::FlowError;
pub use node::{Node, NodeComponent, Sink, SinkComponent, Source, SourceComponent};
pub use ops::{
    link_typeless, Broadcast, BroadcastTypeless, CombineLatest2, Conditional, Queue, Router,
    UnknownKeyPolicy,
};
pub use rill_core::Status;
