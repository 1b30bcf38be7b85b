//! Top-level service tying registered pipelines to a runtime.

use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Context;
use async_trait::async_trait;
use rill_control::{ClientConfig, Connect};
use rill_core::{Service, ServiceCore, ServiceState};

use crate::error::ExecError;
use crate::pipeline::PipelineDefinition;
use crate::port_graph::PortGraph;
use crate::runtime::Runtime;

#[derive(Clone, Default)]
pub struct ExecutorConfig {
    pub client: ClientConfig,
}

/// Ordinary owned object: its lifetime is bounded by the embedding
/// scope, and several executors may coexist in one process.
pub struct Executor {
    core: Arc<ServiceCore>,
    config: ExecutorConfig,
    connector: StdMutex<Option<Box<dyn Connect>>>,
    registered: StdMutex<Vec<PipelineDefinition>>,
    runtime: StdMutex<Option<Arc<Runtime>>>,
}

impl Executor {
    pub fn new(config: ExecutorConfig, connector: impl Connect + 'static) -> Self {
        Self {
            core: Arc::new(ServiceCore::new("executor")),
            config,
            connector: StdMutex::new(Some(Box::new(connector))),
            registered: StdMutex::new(Vec::new()),
            runtime: StdMutex::new(None),
        }
    }

    /// Validates and stores a pipeline definition. Fails with
    /// `validation_error` on an ill-formed port graph, and refuses
    /// registrations once the executor has started.
    pub fn register_pipeline(&self, pipeline: PipelineDefinition) -> Result<(), ExecError> {
        PortGraph::validate(&pipeline)?;
        // The registration list and the start path share this lock, so
        // a pipeline cannot slip in while start is snapshotting.
        let mut registered = self.registered.lock().expect("pipeline registry lock");
        if self.core.state() != ServiceState::Initialized {
            return Err(ExecError::AlreadyStarted);
        }
        registered.push(pipeline);
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.service_start().await
    }

    pub async fn stop(&self) {
        self.service_stop().await;
    }

    pub async fn join(&self) {
        self.service_await_join().await;
    }

    pub fn kill(&self) {
        self.service_kill();
    }

    /// Blocking conveniences for non-async embedders.
    pub fn start_blocking(&self) -> anyhow::Result<()> {
        rill_runtime::block_on(self.start())
    }

    pub fn stop_blocking(&self) {
        rill_runtime::block_on(self.stop());
    }

    pub fn join_blocking(&self) {
        rill_runtime::block_on(self.join());
    }

    pub fn runtime(&self) -> Option<Arc<Runtime>> {
        self.runtime.lock().expect("runtime slot lock").clone()
    }
}

#[async_trait]
impl Service for Executor {
    fn service_core(&self) -> &ServiceCore {
        &self.core
    }

    async fn do_start(&self) -> anyhow::Result<()> {
        let connector = self
            .connector
            .lock()
            .expect("connector slot lock")
            .take()
            .context("executor cannot start twice")?;
        let runtime = Arc::new(Runtime::new(self.config.client.clone(), connector));
        *self.runtime.lock().expect("runtime slot lock") = Some(Arc::clone(&runtime));

        runtime.service_start().await?;
        runtime.service_await_live().await?;

        let pipelines = self
            .registered
            .lock()
            .expect("pipeline registry lock")
            .clone();
        runtime.start_pipelines(pipelines).await?;

        // Runtime termination (e.g. a broken control-plane stream) must
        // unblock anyone joined on the executor.
        let core = Arc::clone(&self.core);
        let watched = Arc::clone(&runtime);
        let _ = rill_runtime::spawn(async move {
            watched.service_await_join().await;
            if core.state() == ServiceState::Running {
                core.advance_to(ServiceState::Stopping);
                core.advance_to(ServiceState::Stopped);
            }
        });
        Ok(())
    }

    async fn do_stop(&self) {
        let runtime = self.runtime.lock().expect("runtime slot lock").clone();
        if let Some(runtime) = runtime {
            runtime.service_stop().await;
            runtime.service_await_join().await;
        }
    }

    fn do_kill(&self) {
        let runtime = self.runtime.lock().expect("runtime slot lock").clone();
        if let Some(runtime) = runtime {
            runtime.service_kill();
        }
    }
}
