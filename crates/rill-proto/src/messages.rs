//! Concrete payloads carried inside [`AnyPayload`](crate::AnyPayload).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::Payload;

macro_rules! impl_payload {
    ($($ty:ty => $url:literal),+ $(,)?) => {
        $(
            impl Payload for $ty {
                const TYPE_URL: &'static str = $url;
            }
        )+
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWorkersRequest {
    pub machine_id: u64,
    pub worker_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWorkersResponse {
    pub machine_id: u64,
    /// One instance id per registered worker address, in order.
    pub instance_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineAssignmentRequest {
    pub machine_id: u64,
    pub pipeline_name: String,
    pub segment_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentAssignment {
    pub segment_name: String,
    pub partition_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineAssignmentResponse {
    pub pipeline_id: u64,
    pub assignments: Vec<SegmentAssignment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionServiceRegisterRequest {
    pub service_name: String,
    pub roles: BTreeSet<String>,
    pub machine_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStateUpdate {
    pub machine_id: u64,
}

/// Membership of one subscription service, role name to member
/// machine ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionGroup {
    pub members: BTreeMap<String, BTreeSet<u64>>,
}

/// Snapshot of the control plane's view of the world, pushed to every
/// client on change. The control plane is the source of truth; clients
/// never persist this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneState {
    pub epoch: u64,
    pub machine_count: u64,
    pub subscriptions: BTreeMap<String, SubscriptionGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceErrorNotice {
    pub instance_id: u64,
    pub message: String,
}

impl_payload!(
    RegisterWorkersRequest => "rill.protocol.RegisterWorkersRequest",
    RegisterWorkersResponse => "rill.protocol.RegisterWorkersResponse",
    PipelineAssignmentRequest => "rill.protocol.PipelineAssignmentRequest",
    PipelineAssignmentResponse => "rill.protocol.PipelineAssignmentResponse",
    SubscriptionServiceRegisterRequest => "rill.protocol.SubscriptionServiceRegisterRequest",
    RequestStateUpdate => "rill.protocol.RequestStateUpdate",
    ControlPlaneState => "rill.protocol.ControlPlaneState",
    InstanceErrorNotice => "rill.protocol.InstanceErrorNotice",
);
