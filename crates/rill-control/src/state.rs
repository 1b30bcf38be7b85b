//! State-update broadcast: a behaviour subject over the most recent
//! [`ControlPlaneState`].

use rill_proto::messages::ControlPlaneState;
use tokio::sync::watch;

/// Latest control-plane state plus the client-local publish counter.
/// `update_count` is strictly increasing across published updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub update_count: u64,
    pub state: ControlPlaneState,
}

/// Subscription to the state-update subject. A new subscriber observes
/// the current value immediately via [`current`](Self::current);
/// subsequent updates arrive through [`next`](Self::next) in
/// publication order.
pub struct StateUpdates {
    rx: watch::Receiver<StateSnapshot>,
}

impl StateUpdates {
    pub(crate) fn new(rx: watch::Receiver<StateSnapshot>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> StateSnapshot {
        self.rx.borrow().clone()
    }

    /// Waits for a snapshot newer than the last one observed through
    /// this subscription. Returns `None` once the client is gone.
    pub async fn next(&mut self) -> Option<StateSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
