//! Drives assigned pipeline instances: requests segment assignments
//! from the architect, builds the assigned segments, and owns their
//! node tasks and port manifolds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future;
use rill_control::ControlPlaneClient;
use rill_core::{Service, ServiceCore};
use rill_proto::messages::{PipelineAssignmentRequest, PipelineAssignmentResponse};
use rill_proto::EventType;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manifold::{Manifold, SegmentContext};
use crate::pipeline::PipelineDefinition;

/// How long a cooperative stop waits for segment tasks to drain before
/// force-closing the port manifolds.
const STOP_DRAIN_GRACE: Duration = Duration::from_secs(2);

pub struct PipelineManager {
    core: ServiceCore,
    client: Arc<ControlPlaneClient>,
    pipelines: Vec<PipelineDefinition>,
    stop: CancellationToken,
    running: StdMutex<RunningState>,
}

#[derive(Default)]
struct RunningState {
    manifolds: Vec<BTreeMap<String, Manifold>>,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineManager {
    pub fn new(client: Arc<ControlPlaneClient>, pipelines: Vec<PipelineDefinition>) -> Self {
        Self {
            core: ServiceCore::new("pipeline-manager"),
            client,
            pipelines,
            stop: CancellationToken::new(),
            running: StdMutex::new(RunningState::default()),
        }
    }
}

#[async_trait]
impl Service for PipelineManager {
    fn service_core(&self) -> &ServiceCore {
        &self.core
    }

    async fn do_start(&self) -> anyhow::Result<()> {
        for pipeline in &self.pipelines {
            let request = PipelineAssignmentRequest {
                machine_id: self.client.machine_id(),
                pipeline_name: pipeline.name().to_string(),
                segment_names: pipeline
                    .segments()
                    .iter()
                    .map(|segment| segment.name().to_string())
                    .collect(),
            };
            let response: PipelineAssignmentResponse = self
                .client
                .await_unary(EventType::ClientUnaryRequestPipelineAssignment, &request)
                .await?;
            let assigned: BTreeSet<&str> = response
                .assignments
                .iter()
                .map(|assignment| assignment.segment_name.as_str())
                .collect();
            info!(
                pipeline = pipeline.name(),
                pipeline_id = response.pipeline_id,
                segments = assigned.len(),
                "received segment assignment"
            );

            let mut manifolds = BTreeMap::new();
            let mut tasks = Vec::new();
            for segment in pipeline.segments() {
                if !assigned.contains(segment.name()) {
                    debug!(segment = segment.name(), "segment not assigned here");
                    continue;
                }
                let mut ctx = SegmentContext::new(segment, &mut manifolds);
                segment.initialize(&mut ctx)?;
                tasks.extend(ctx.into_tasks());
            }

            let mut running = self.running.lock().expect("pipeline manager lock");
            for task in tasks {
                // Every node task carries the manager's stop token; a
                // cancelled task drops its nodes, which releases their
                // edges and propagates `Closed` to the neighbors.
                let stop = self.stop.clone();
                running.tasks.push(rill_runtime::spawn(async move {
                    tokio::select! {
                        _ = stop.cancelled() => {}
                        _ = task => {}
                    }
                }));
            }
            running.manifolds.push(manifolds);
        }
        Ok(())
    }

    async fn do_stop(&self) {
        // Cooperative teardown: let the segment tasks drain on their
        // own. If they do not finish within the grace period (an
        // unbounded producer, usually), force-close the port
        // interconnects so every loop observes `Closed`. Manifolds are
        // dropped only after the join so their edge handles are
        // released first.
        let tasks = {
            let mut running = self.running.lock().expect("pipeline manager lock");
            std::mem::take(&mut running.tasks)
        };
        let mut join_all = future::join_all(tasks);
        if tokio::time::timeout(STOP_DRAIN_GRACE, &mut join_all)
            .await
            .is_err()
        {
            warn!("segment tasks did not drain in time; closing port manifolds");
            {
                let running = self.running.lock().expect("pipeline manager lock");
                for manifolds in &running.manifolds {
                    for manifold in manifolds.values() {
                        manifold.close();
                    }
                }
            }
            self.stop.cancel();
            let _ = join_all.await;
        }
        let manifolds = {
            let mut running = self.running.lock().expect("pipeline manager lock");
            std::mem::take(&mut running.manifolds)
        };
        drop(manifolds);
    }

    fn do_kill(&self) {
        self.stop.cancel();
        let running = self.running.lock().expect("pipeline manager lock");
        for task in &running.tasks {
            task.abort();
        }
    }
}
