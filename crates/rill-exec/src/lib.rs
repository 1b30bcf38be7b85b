//! Top-level execution layer: pipeline definitions and their
//! validation, the per-process runtime, and the executor service that
//! ties pipelines to the control plane.

pub mod error;
pub mod executor;
pub mod manager;
pub mod manifold;
pub mod pipeline;
pub mod port_graph;
pub mod runtime;

pub use error::ExecError;
pub use executor::{Executor, ExecutorConfig};
pub use manager::PipelineManager;
pub use manifold::{PortEgress, PortIngress, SegmentContext};
pub use pipeline::{PipelineDefinition, SegmentDefinition};
pub use port_graph::{PortConnections, PortGraph, ValidationError};
pub use runtime::Runtime;
