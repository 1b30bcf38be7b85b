pub mod component;
pub mod sink;
pub mod source;
pub mod transform;

pub use component::{NodeComponent, SinkComponent, SourceComponent};
pub use sink::Sink;
pub use source::Source;
pub use transform::Node;
