//! Lifecycle state machine shared by every long-lived runtime component.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::error;

/// Lifecycle states, ordered. Transitions only move forward, except
/// that `Killed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServiceState {
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Killed,
}

impl ServiceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Killed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service '{service}' cannot restart from {state:?}")]
    Restart {
        service: String,
        state: ServiceState,
    },
    #[error("service '{service}' terminated before reaching Running")]
    TerminatedEarly { service: String },
}

/// Shared lifecycle core. Owns the current [`ServiceState`] behind a
/// watch channel so `await_live` / `await_join` are plain async waits,
/// and serializes transitions through a mutex.
pub struct ServiceCore {
    name: String,
    state: watch::Sender<ServiceState>,
    transition: Mutex<()>,
}

impl ServiceCore {
    pub fn new(name: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ServiceState::Initialized);
        Self {
            name: name.into(),
            state,
            transition: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Claims the `Initialized -> Starting` transition. Returns
    /// `Ok(false)` when the service is already starting or running
    /// (start is idempotent), and an error when it already passed
    /// `Running` (services do not restart).
    pub fn begin_start(&self) -> Result<bool, ServiceError> {
        let _guard = self.transition.lock().expect("service transition lock");
        match self.state() {
            ServiceState::Initialized => {
                self.state.send_replace(ServiceState::Starting);
                Ok(true)
            }
            ServiceState::Starting | ServiceState::Running => Ok(false),
            state => Err(ServiceError::Restart {
                service: self.name.clone(),
                state,
            }),
        }
    }

    /// Claims the `Running -> Stopping` transition. Returns false when
    /// there is nothing to stop (never started, already stopping or
    /// terminal), making stop idempotent.
    pub fn begin_stop(&self) -> bool {
        let _guard = self.transition.lock().expect("service transition lock");
        match self.state() {
            ServiceState::Running => {
                self.state.send_replace(ServiceState::Stopping);
                true
            }
            _ => false,
        }
    }

    /// Advances the state forward to `next` if the current state is
    /// earlier. Returns whether a transition happened.
    pub fn advance_to(&self, next: ServiceState) -> bool {
        let _guard = self.transition.lock().expect("service transition lock");
        let current = self.state();
        if next == ServiceState::Killed {
            if current.is_terminal() {
                return false;
            }
            self.state.send_replace(ServiceState::Killed);
            return true;
        }
        if current >= next || current.is_terminal() {
            return false;
        }
        self.state.send_replace(next);
        true
    }

    /// Forces the terminal `Killed` state from anywhere. Returns
    /// whether the state changed.
    pub fn kill(&self) -> bool {
        self.advance_to(ServiceState::Killed)
    }

    /// Blocks until the service reaches `Running` (or has already run
    /// to completion). Fails if the service is killed first.
    pub async fn await_live(&self) -> Result<(), ServiceError> {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ServiceState::Killed => {
                    return Err(ServiceError::TerminatedEarly {
                        service: self.name.clone(),
                    });
                }
                state if state >= ServiceState::Running => return Ok(()),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(ServiceError::TerminatedEarly {
                    service: self.name.clone(),
                });
            }
        }
    }

    /// Blocks until the service reaches a terminal state.
    pub async fn await_join(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if rx.borrow_and_update().is_terminal() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for ServiceCore {
    fn drop(&mut self) {
        let state = self.state();
        if state != ServiceState::Initialized && !state.is_terminal() {
            error!(
                service = %self.name,
                ?state,
                "service dropped before reaching a terminal state"
            );
            debug_assert!(false, "service '{}' dropped in {state:?}", self.name);
        }
    }
}

/// Skeleton implemented by every long-lived service. Implementors
/// provide the `do_*` hooks; the provided methods drive the shared
/// state machine around them.
#[async_trait]
pub trait Service: Send + Sync {
    fn service_core(&self) -> &ServiceCore;

    /// Brings the service up. Runs between `Starting` and `Running`.
    async fn do_start(&self) -> anyhow::Result<()>;

    /// Cooperative teardown. Runs between `Stopping` and `Stopped`.
    async fn do_stop(&self);

    /// Best-effort immediate teardown.
    fn do_kill(&self) {}

    async fn service_start(&self) -> anyhow::Result<()> {
        if !self.service_core().begin_start()? {
            return Ok(());
        }
        match self.do_start().await {
            Ok(()) => {
                self.service_core().advance_to(ServiceState::Running);
                Ok(())
            }
            Err(error) => {
                self.service_core().kill();
                self.do_kill();
                Err(error)
            }
        }
    }

    async fn service_stop(&self) {
        if !self.service_core().begin_stop() {
            return;
        }
        self.do_stop().await;
        self.service_core().advance_to(ServiceState::Stopped);
    }

    fn service_kill(&self) {
        if self.service_core().kill() {
            self.do_kill();
        }
    }

    async fn service_await_live(&self) -> Result<(), ServiceError> {
        self.service_core().await_live().await
    }

    async fn service_await_join(&self) {
        self.service_core().await_join().await
    }
}

#[cfg(test)]
mod tests {
    use super::{ServiceCore, ServiceError, ServiceState};

    #[test]
    fn start_stop_round_trip() {
        let core = ServiceCore::new("svc");
        assert_eq!(core.state(), ServiceState::Initialized);
        assert!(core.begin_start().expect("begin start"));
        assert!(core.advance_to(ServiceState::Running));
        assert!(core.begin_stop());
        assert!(core.advance_to(ServiceState::Stopped));
        assert_eq!(core.state(), ServiceState::Stopped);
    }

    #[test]
    fn start_is_idempotent_while_running() {
        let core = ServiceCore::new("svc");
        core.begin_start().expect("begin start");
        core.advance_to(ServiceState::Running);
        assert!(!core.begin_start().expect("second start is a no-op"));
        core.kill();
    }

    #[test]
    fn stopped_service_refuses_restart() {
        let core = ServiceCore::new("svc");
        core.begin_start().expect("begin start");
        core.advance_to(ServiceState::Running);
        core.begin_stop();
        core.advance_to(ServiceState::Stopped);
        let err = core.begin_start().expect_err("restart must fail");
        assert!(matches!(err, ServiceError::Restart { .. }));
        assert!(!core.begin_stop());
    }

    #[test]
    fn kill_is_reachable_from_any_state_and_terminal() {
        let core = ServiceCore::new("svc");
        assert!(core.kill());
        assert_eq!(core.state(), ServiceState::Killed);
        assert!(!core.kill());
        assert!(!core.advance_to(ServiceState::Running));
    }

    #[test]
    fn transitions_never_move_backward() {
        let core = ServiceCore::new("svc");
        core.begin_start().expect("begin start");
        core.advance_to(ServiceState::Running);
        assert!(!core.advance_to(ServiceState::Starting));
        assert_eq!(core.state(), ServiceState::Running);
        core.kill();
    }

    #[test]
    fn await_live_resolves_once_running() {
        rill_test_block_on(async {
            let core = std::sync::Arc::new(ServiceCore::new("svc"));
            let waiter = {
                let core = core.clone();
                tokio::spawn(async move { core.await_live().await })
            };
            core.begin_start().expect("begin start");
            core.advance_to(ServiceState::Running);
            waiter
                .await
                .expect("join waiter")
                .expect("service became live");
            core.kill();
        });
    }

    #[test]
    fn await_live_fails_when_killed_first() {
        rill_test_block_on(async {
            let core = std::sync::Arc::new(ServiceCore::new("svc"));
            let waiter = {
                let core = core.clone();
                tokio::spawn(async move { core.await_live().await })
            };
            core.begin_start().expect("begin start");
            core.kill();
            let err = waiter.await.expect("join waiter");
            assert!(matches!(err, Err(ServiceError::TerminatedEarly { .. })));
        });
    }

    fn rill_test_block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("build test runtime")
            .block_on(future)
    }
}
