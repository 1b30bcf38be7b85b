//! Port connectivity map and the pipeline validator.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::pipeline::PipelineDefinition;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortConnections {
    /// Segments reading from the port.
    pub ingress_segments: BTreeSet<String>,
    /// Segments writing to the port.
    pub egress_segments: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("pipeline '{pipeline}' declares no segments")]
    EmptyPipeline { pipeline: String },

    #[error(
        "port '{port}' has incomplete connections: used as ingress by {ingress_segments:?}, as egress by {egress_segments:?}"
    )]
    DanglingPort {
        port: String,
        ingress_segments: Vec<String>,
        egress_segments: Vec<String>,
    },

    /// Only load-balancing manifolds exist at this layer; a port shared
    /// by several segment types would need an explicit manifold choice.
    #[error("port '{port}' connects more than one segment type on one side: {segments:?}")]
    MultiTypedPort { port: String, segments: Vec<String> },
}

/// Map from port name to the segments using it on each side.
pub struct PortGraph {
    ports: BTreeMap<String, PortConnections>,
}

impl PortGraph {
    pub fn new(pipeline: &PipelineDefinition) -> Self {
        let mut ports: BTreeMap<String, PortConnections> = BTreeMap::new();
        for segment in pipeline.segments() {
            for port in segment.ingress_ports() {
                ports
                    .entry(port.clone())
                    .or_default()
                    .ingress_segments
                    .insert(segment.name().to_string());
            }
            for port in segment.egress_ports() {
                ports
                    .entry(port.clone())
                    .or_default()
                    .egress_segments
                    .insert(segment.name().to_string());
            }
        }
        Self { ports }
    }

    pub fn port_map(&self) -> &BTreeMap<String, PortConnections> {
        &self.ports
    }

    /// Checks the rules enforced at `register_pipeline` time: every
    /// port has at least one segment on each side, and no port mixes
    /// segment types on one side.
    pub fn validate(pipeline: &PipelineDefinition) -> Result<(), ValidationError> {
        if pipeline.segments().is_empty() {
            return Err(ValidationError::EmptyPipeline {
                pipeline: pipeline.name().to_string(),
            });
        }
        let graph = Self::new(pipeline);
        for (port, connections) in &graph.ports {
            if connections.ingress_segments.is_empty() || connections.egress_segments.is_empty() {
                return Err(ValidationError::DanglingPort {
                    port: port.clone(),
                    ingress_segments: connections.ingress_segments.iter().cloned().collect(),
                    egress_segments: connections.egress_segments.iter().cloned().collect(),
                });
            }
            if connections.ingress_segments.len() > 1 {
                return Err(ValidationError::MultiTypedPort {
                    port: port.clone(),
                    segments: connections.ingress_segments.iter().cloned().collect(),
                });
            }
            if connections.egress_segments.len() > 1 {
                return Err(ValidationError::MultiTypedPort {
                    port: port.clone(),
                    segments: connections.egress_segments.iter().cloned().collect(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{PortGraph, ValidationError};
    use crate::pipeline::{PipelineDefinition, SegmentDefinition};

    fn segment(name: &str, ingress: &[&str], egress: &[&str]) -> SegmentDefinition {
        SegmentDefinition::new(
            name,
            ingress.iter().copied(),
            egress.iter().copied(),
            |_ctx| Ok(()),
        )
    }

    #[test]
    fn a_complete_port_pair_validates() {
        let mut pipeline = PipelineDefinition::new("p");
        pipeline.add_segment(segment("producer", &[], &["data"]));
        pipeline.add_segment(segment("consumer", &["data"], &[]));
        PortGraph::validate(&pipeline).expect("valid pipeline");
    }

    #[test]
    fn an_empty_pipeline_is_rejected() {
        let pipeline = PipelineDefinition::new("empty");
        let err = PortGraph::validate(&pipeline).expect_err("must reject");
        assert!(matches!(err, ValidationError::EmptyPipeline { .. }));
    }

    #[test]
    fn an_egress_only_port_is_rejected() {
        let mut pipeline = PipelineDefinition::new("p");
        pipeline.add_segment(segment("producer", &[], &["data"]));
        let err = PortGraph::validate(&pipeline).expect_err("must reject");
        assert!(matches!(err, ValidationError::DanglingPort { ref port, .. } if port == "data"));
    }

    #[test]
    fn a_port_with_two_segment_types_on_one_side_is_rejected() {
        let mut pipeline = PipelineDefinition::new("p");
        pipeline.add_segment(segment("producer-a", &[], &["data"]));
        pipeline.add_segment(segment("producer-b", &[], &["data"]));
        pipeline.add_segment(segment("consumer", &["data"], &[]));
        let err = PortGraph::validate(&pipeline).expect_err("must reject");
        assert!(matches!(err, ValidationError::MultiTypedPort { ref port, .. } if port == "data"));
    }

    #[test]
    fn the_port_map_lists_both_sides() {
        let mut pipeline = PipelineDefinition::new("p");
        pipeline.add_segment(segment("producer", &[], &["data"]));
        pipeline.add_segment(segment("consumer", &["data"], &[]));
        let graph = PortGraph::new(&pipeline);
        let connections = graph.port_map().get("data").expect("port present");
        assert!(connections.egress_segments.contains("producer"));
        assert!(connections.ingress_segments.contains("consumer"));
    }
}
