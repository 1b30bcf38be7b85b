//! Per-process runtime: owns the control-plane client and, once
//! pipelines are handed over, their manager. Children start in
//! dependency order and stop in reverse.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use rill_control::{ClientConfig, Connect, ControlPlaneClient};
use rill_core::{Service, ServiceCore, ServiceState};
use tracing::warn;

use crate::manager::PipelineManager;
use crate::pipeline::PipelineDefinition;

pub struct Runtime {
    core: Arc<ServiceCore>,
    client: Arc<ControlPlaneClient>,
    manager: Arc<StdMutex<Option<Arc<PipelineManager>>>>,
}

impl Runtime {
    pub fn new(client_config: ClientConfig, connector: impl Connect + 'static) -> Self {
        Self {
            core: Arc::new(ServiceCore::new("runtime")),
            client: Arc::new(ControlPlaneClient::new(client_config, connector)),
            manager: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn control_plane(&self) -> &Arc<ControlPlaneClient> {
        &self.client
    }

    /// Hands registered pipeline definitions to a fresh manager and
    /// starts it. Called by the executor once the runtime is live.
    pub(crate) async fn start_pipelines(
        &self,
        pipelines: Vec<PipelineDefinition>,
    ) -> anyhow::Result<Arc<PipelineManager>> {
        let manager = Arc::new(PipelineManager::new(Arc::clone(&self.client), pipelines));
        *self.manager.lock().expect("pipeline manager slot lock") = Some(Arc::clone(&manager));
        manager.service_start().await?;
        Ok(manager)
    }
}

#[async_trait]
impl Service for Runtime {
    fn service_core(&self) -> &ServiceCore {
        &self.core
    }

    async fn do_start(&self) -> anyhow::Result<()> {
        self.client.service_start().await?;
        self.client.service_await_live().await?;

        // A broken control-plane stream must unblock anyone joined on
        // the runtime, so watch the client and cascade its termination.
        let client = Arc::clone(&self.client);
        let core = Arc::clone(&self.core);
        let manager_slot = Arc::clone(&self.manager);
        let _ = rill_runtime::spawn(async move {
            client.service_await_join().await;
            if core.state() == ServiceState::Running {
                warn!("control plane client terminated; tearing down runtime");
                let manager = manager_slot
                    .lock()
                    .expect("pipeline manager slot lock")
                    .take();
                if let Some(manager) = manager {
                    manager.service_kill();
                }
                core.advance_to(ServiceState::Stopping);
                core.advance_to(ServiceState::Stopped);
            }
        });
        Ok(())
    }

    async fn do_stop(&self) {
        // Reverse dependency order: pipelines first, then the client.
        let manager = self
            .manager
            .lock()
            .expect("pipeline manager slot lock")
            .take();
        if let Some(manager) = manager {
            manager.service_stop().await;
            manager.service_await_join().await;
        }
        self.client.service_stop().await;
        self.client.service_await_join().await;
    }

    fn do_kill(&self) {
        let manager = self
            .manager
            .lock()
            .expect("pipeline manager slot lock")
            .take();
        if let Some(manager) = manager {
            manager.service_kill();
        }
        self.client.service_kill();
    }
}
