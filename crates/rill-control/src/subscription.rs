//! Named membership groups advertised to the architect. Registered
//! once per name per process; membership is maintained asynchronously
//! from incoming state updates.

use std::collections::{BTreeMap, BTreeSet};

use rill_proto::messages::ControlPlaneState;
use tokio::sync::watch;

pub struct SubscriptionService {
    name: String,
    roles: BTreeSet<String>,
    members: watch::Sender<BTreeMap<String, BTreeSet<u64>>>,
}

impl SubscriptionService {
    pub(crate) fn new(name: impl Into<String>, roles: BTreeSet<String>) -> Self {
        let (members, _) = watch::channel(BTreeMap::new());
        Self {
            name: name.into(),
            roles,
            members,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Current membership, role name to member machine ids.
    pub fn members(&self) -> BTreeMap<String, BTreeSet<u64>> {
        self.members.borrow().clone()
    }

    /// Watch membership changes; the receiver holds the current value.
    pub fn watch_members(&self) -> watch::Receiver<BTreeMap<String, BTreeSet<u64>>> {
        self.members.subscribe()
    }

    pub(crate) fn apply_state(&self, state: &ControlPlaneState) {
        let Some(group) = state.subscriptions.get(&self.name) else {
            return;
        };
        let next: BTreeMap<String, BTreeSet<u64>> = group
            .members
            .iter()
            .filter(|(role, _)| self.roles.contains(*role))
            .map(|(role, members)| (role.clone(), members.clone()))
            .collect();
        self.members.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
