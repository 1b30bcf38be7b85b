//! In-process architect double for exercising the client and the
//! executor without a real control plane.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rill_proto::messages::{
    ControlPlaneState, InstanceErrorNotice, PipelineAssignmentRequest, PipelineAssignmentResponse,
    RegisterWorkersRequest, RegisterWorkersResponse, SegmentAssignment,
    SubscriptionServiceRegisterRequest,
};
use rill_proto::{AnyPayload, Event, EventType};
use tracing::{debug, warn};

use crate::transport::{pair, BidiTransport, ChannelTransport};

struct ArchitectInner {
    transport: ChannelTransport,
    state: Mutex<ControlPlaneState>,
    next_instance_id: AtomicU64,
    next_pipeline_id: AtomicU64,
    hold_unaries: AtomicBool,
    held: Mutex<Vec<Event>>,
}

/// Control handle over a spawned [`MockArchitect`] loop.
pub struct MockArchitect {
    inner: Arc<ArchitectInner>,
    task: tokio::task::JoinHandle<()>,
}

impl MockArchitect {
    /// Spawns the architect loop and returns the client-side transport
    /// to connect a [`ControlPlaneClient`](crate::ControlPlaneClient)
    /// to it.
    pub fn spawn() -> (Self, ChannelTransport) {
        let (server_transport, client_transport) = pair(64);
        let inner = Arc::new(ArchitectInner {
            transport: server_transport,
            state: Mutex::new(ControlPlaneState::default()),
            next_instance_id: AtomicU64::new(1),
            next_pipeline_id: AtomicU64::new(1),
            hold_unaries: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
        });
        let task = rill_runtime::spawn(run(Arc::clone(&inner)));
        (Self { inner, task }, client_transport)
    }

    /// Queue unary requests instead of answering them, until
    /// [`release_held`](Self::release_held).
    pub fn hold_unary_responses(&self) {
        self.inner.hold_unaries.store(true, Ordering::SeqCst);
    }

    /// Resume answering unary requests as they arrive.
    pub fn answer_unary_responses(&self) {
        self.inner.hold_unaries.store(false, Ordering::SeqCst);
    }

    pub fn held_count(&self) -> usize {
        self.inner.held.lock().expect("held unary lock").len()
    }

    /// Answers held unary requests in the given index order (indices
    /// into the arrival order). Unlisted requests stay held.
    pub async fn release_held(&self, order: &[usize]) {
        let held: Vec<Event> = {
            let held = self.inner.held.lock().expect("held unary lock");
            order.iter().filter_map(|&i| held.get(i).cloned()).collect()
        };
        for event in held {
            respond_unary(&self.inner, event).await;
        }
    }

    /// Publishes a state update after applying `mutate` to the held
    /// state.
    pub async fn push_state_update(&self, mutate: impl FnOnce(&mut ControlPlaneState)) {
        let state = {
            let mut state = self.inner.state.lock().expect("architect state lock");
            mutate(&mut state);
            state.epoch += 1;
            state.clone()
        };
        send_state(&self.inner, state).await;
    }

    pub async fn send_instance_error(&self, instance_id: u64, message: impl Into<String>) {
        let notice = InstanceErrorNotice {
            instance_id,
            message: message.into(),
        };
        let payload = AnyPayload::pack(&notice).expect("pack instance error");
        let _ = self
            .inner
            .transport
            .send(Event::untagged(EventType::InstanceError, payload))
            .await;
    }

    pub async fn send_server_error(&self, message: impl Into<String>) {
        let _ = self
            .inner
            .transport
            .send(Event::error_response(EventType::ServerError, 0, message))
            .await;
    }

    /// Breaks the stream without any goodbye, as a crashed architect
    /// would.
    pub async fn drop_stream(&self) {
        self.inner.transport.shutdown().await;
        self.task.abort();
    }
}

async fn run(inner: Arc<ArchitectInner>) {
    while let Some(event) = inner.transport.recv().await {
        match event.event_type {
            EventType::ClientRegisterWorkers
            | EventType::ClientUnaryRequestPipelineAssignment => {
                if inner.hold_unaries.load(Ordering::SeqCst) {
                    inner.held.lock().expect("held unary lock").push(event);
                    continue;
                }
                respond_unary(&inner, event).await;
            }
            EventType::ClientEventRequestStateUpdate => {
                let state = {
                    let mut state = inner.state.lock().expect("architect state lock");
                    state.epoch += 1;
                    state.clone()
                };
                send_state(&inner, state).await;
            }
            EventType::ClientSubscriptionServiceRegister => {
                let Ok(request) = event.payload.unpack::<SubscriptionServiceRegisterRequest>()
                else {
                    warn!("architect dropped undecodable subscription registration");
                    continue;
                };
                let state = {
                    let mut state = inner.state.lock().expect("architect state lock");
                    let group = state
                        .subscriptions
                        .entry(request.service_name.clone())
                        .or_default();
                    for role in &request.roles {
                        group
                            .members
                            .entry(role.clone())
                            .or_default()
                            .insert(request.machine_id);
                    }
                    state.epoch += 1;
                    state.clone()
                };
                send_state(&inner, state).await;
            }
            other => debug!(event_type = ?other, "architect ignoring event"),
        }
    }
    // Close our outbound side so the client's reader observes the end
    // of stream instead of waiting forever.
    inner.transport.shutdown().await;
    debug!("mock architect loop exited");
}

async fn respond_unary(inner: &Arc<ArchitectInner>, request: Event) {
    let response = match request.event_type {
        EventType::ClientRegisterWorkers => {
            let Ok(message) = request.payload.unpack::<RegisterWorkersRequest>() else {
                warn!("architect dropped undecodable registration");
                return;
            };
            {
                let mut state = inner.state.lock().expect("architect state lock");
                state.machine_count += 1;
            }
            let instance_ids = message
                .worker_addresses
                .iter()
                .map(|_| inner.next_instance_id.fetch_add(1, Ordering::SeqCst))
                .collect();
            let body = RegisterWorkersResponse {
                machine_id: message.machine_id,
                instance_ids,
            };
            Event::tagged(
                request.event_type,
                request.tag,
                AnyPayload::pack(&body).expect("pack registration response"),
            )
        }
        EventType::ClientUnaryRequestPipelineAssignment => {
            let Ok(message) = request.payload.unpack::<PipelineAssignmentRequest>() else {
                warn!("architect dropped undecodable assignment request");
                return;
            };
            let assignments = message
                .segment_names
                .iter()
                .map(|segment_name| SegmentAssignment {
                    segment_name: segment_name.clone(),
                    partition_id: 0,
                })
                .collect();
            let body = PipelineAssignmentResponse {
                pipeline_id: inner.next_pipeline_id.fetch_add(1, Ordering::SeqCst),
                assignments,
            };
            Event::tagged(
                request.event_type,
                request.tag,
                AnyPayload::pack(&body).expect("pack assignment response"),
            )
        }
        other => {
            warn!(event_type = ?other, "architect cannot answer event");
            return;
        }
    };
    let _ = inner.transport.send(response).await;
}

async fn send_state(inner: &Arc<ArchitectInner>, state: ControlPlaneState) {
    let payload = AnyPayload::pack(&state).expect("pack control plane state");
    let _ = inner
        .transport
        .send(Event::untagged(EventType::ServerStateUpdate, payload))
        .await;
}
