//! User-declared pipelines: segments and the named ports connecting
//! them. The per-segment computation is opaque to the runtime; each
//! segment carries an initializer invoked once its assignment arrives.

use std::sync::Arc;

use crate::error::ExecError;
use crate::manifold::SegmentContext;

type SegmentInit = dyn Fn(&mut SegmentContext<'_>) -> Result<(), ExecError> + Send + Sync;

#[derive(Clone)]
pub struct SegmentDefinition {
    name: String,
    ingress_ports: Vec<String>,
    egress_ports: Vec<String>,
    initializer: Arc<SegmentInit>,
}

impl SegmentDefinition {
    pub fn new<I, E>(
        name: impl Into<String>,
        ingress_ports: I,
        egress_ports: E,
        initializer: impl Fn(&mut SegmentContext<'_>) -> Result<(), ExecError> + Send + Sync + 'static,
    ) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            name: name.into(),
            ingress_ports: ingress_ports.into_iter().map(Into::into).collect(),
            egress_ports: egress_ports.into_iter().map(Into::into).collect(),
            initializer: Arc::new(initializer),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ports this segment reads from.
    pub fn ingress_ports(&self) -> &[String] {
        &self.ingress_ports
    }

    /// Ports this segment writes to.
    pub fn egress_ports(&self) -> &[String] {
        &self.egress_ports
    }

    pub(crate) fn initialize(&self, ctx: &mut SegmentContext<'_>) -> Result<(), ExecError> {
        (self.initializer.as_ref())(ctx)
    }
}

#[derive(Clone)]
pub struct PipelineDefinition {
    name: String,
    segments: Vec<SegmentDefinition>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            segments: Vec::new(),
        }
    }

    pub fn add_segment(&mut self, segment: SegmentDefinition) -> &mut Self {
        self.segments.push(segment);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segments(&self) -> &[SegmentDefinition] {
        &self.segments
    }
}
