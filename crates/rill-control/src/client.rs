//! Primary control-plane client.
//!
//! One instance per process. Owns the client side of the bidirectional
//! architect stream, the server event handler, and the router that
//! fulfills pending unary requests by correlation tag. Depending on
//! construction it either runs its own progress engine (a dedicated
//! thread with a single-threaded runtime driving the reader and writer
//! loops) or spawns both loops onto an externally supplied runtime
//! handle.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rill_core::{Service, ServiceCore, ServiceState};
use rill_proto::messages::{
    ControlPlaneState, InstanceErrorNotice, RegisterWorkersRequest, RegisterWorkersResponse,
    RequestStateUpdate, SubscriptionServiceRegisterRequest,
};
use rill_proto::{AnyPayload, Event, EventType, Payload};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ClientError;
use crate::state::{StateSnapshot, StateUpdates};
use crate::subscription::SubscriptionService;
use crate::transport::{BidiTransport, Connect};
use crate::unary::UnaryHandle;

/// Connection state of the client, observable for tests and embedders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    FailedToConnect,
    Connected,
    RegisteringWorkers,
    Operational,
}

/// Whether the client drives its own progress engine or runs on a
/// caller-provided runtime. Fixed at construction.
#[derive(Clone)]
pub enum ProgressMode {
    /// Dedicated named thread with a single-threaded runtime.
    Owned,
    /// Reader and writer loops spawned onto this handle.
    External(tokio::runtime::Handle),
}

#[derive(Clone)]
pub struct ClientConfig {
    pub machine_id: u64,
    pub worker_addresses: Vec<String>,
    /// Deadline for the worker-registration unary during startup.
    pub register_timeout: Duration,
    pub outgoing_depth: usize,
    pub progress: ProgressMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            machine_id: std::process::id() as u64,
            worker_addresses: vec!["local://worker-0".to_string()],
            register_timeout: Duration::from_secs(5),
            outgoing_depth: 64,
            progress: ProgressMode::Owned,
        }
    }
}

type InstanceHandler = Box<dyn Fn(InstanceErrorNotice) + Send + Sync>;

pub(crate) struct ClientShared {
    machine_id: u64,
    client_state: watch::Sender<ClientState>,
    outgoing: mpsc::Sender<Event>,
    pending: StdMutex<HashMap<u64, oneshot::Sender<Result<Event, ClientError>>>>,
    next_tag: AtomicU64,
    state_hub: watch::Sender<StateSnapshot>,
    subscriptions: StdMutex<BTreeMap<String, Arc<SubscriptionService>>>,
    instance_handlers: StdMutex<HashMap<u64, InstanceHandler>>,
    instance_ids: StdMutex<Vec<u64>>,
    shutting_down: AtomicBool,
    writer_wakeup: Notify,
}

impl ClientShared {
    fn set_client_state(&self, next: ClientState) {
        self.client_state.send_replace(next);
    }

    pub(crate) fn retire_tag(&self, tag: u64) {
        self.pending.lock().expect("pending unary lock").remove(&tag);
    }

    fn publish_state(&self, state: ControlPlaneState) {
        {
            let subscriptions = self.subscriptions.lock().expect("subscription registry lock");
            for service in subscriptions.values() {
                service.apply_state(&state);
            }
        }
        self.state_hub.send_modify(|snapshot| {
            snapshot.update_count += 1;
            snapshot.state = state;
        });
    }

    fn route_instance_error(&self, notice: InstanceErrorNotice) {
        let handlers = self.instance_handlers.lock().expect("instance handler lock");
        match handlers.get(&notice.instance_id) {
            Some(handler) => handler(notice),
            None => warn!(
                instance_id = notice.instance_id,
                message = %notice.message,
                "instance error for an unknown instance dropped"
            ),
        }
    }

    async fn send_event(&self, event: Event) -> Result<(), ClientError> {
        self.outgoing
            .send(event)
            .await
            .map_err(|_| ClientError::NotReady)
    }
}

async fn send_unary<Resp, Req>(
    shared: &Arc<ClientShared>,
    event_type: EventType,
    request: &Req,
) -> Result<UnaryHandle<Resp>, ClientError>
where
    Resp: Payload,
    Req: Payload,
{
    let payload = AnyPayload::pack(request)?;
    let tag = shared.next_tag.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = oneshot::channel();
    shared
        .pending
        .lock()
        .expect("pending unary lock")
        .insert(tag, tx);
    if let Err(error) = shared
        .send_event(Event::tagged(event_type, tag, payload))
        .await
    {
        shared.retire_tag(tag);
        return Err(error);
    }
    Ok(UnaryHandle {
        tag,
        rx,
        shared: Arc::clone(shared),
        _marker: PhantomData,
    })
}

struct ProgressHandles {
    tasks: Vec<JoinHandle<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

pub struct ControlPlaneClient {
    core: Arc<ServiceCore>,
    config: ClientConfig,
    connector: Box<dyn Connect>,
    shared: Arc<ClientShared>,
    outgoing_rx: StdMutex<Option<mpsc::Receiver<Event>>>,
    transport: StdMutex<Option<Arc<dyn BidiTransport>>>,
    progress: StdMutex<ProgressHandles>,
}

impl ControlPlaneClient {
    pub fn new(config: ClientConfig, connector: impl Connect + 'static) -> Self {
        let (outgoing, outgoing_rx) = mpsc::channel(config.outgoing_depth.max(1));
        let (client_state, _) = watch::channel(ClientState::Disconnected);
        let (state_hub, _) = watch::channel(StateSnapshot::default());
        Self {
            core: Arc::new(ServiceCore::new("control-plane-client")),
            shared: Arc::new(ClientShared {
                machine_id: config.machine_id,
                client_state,
                outgoing,
                pending: StdMutex::new(HashMap::new()),
                // Tag zero is reserved for untagged events.
                next_tag: AtomicU64::new(1),
                state_hub,
                subscriptions: StdMutex::new(BTreeMap::new()),
                instance_handlers: StdMutex::new(HashMap::new()),
                instance_ids: StdMutex::new(Vec::new()),
                shutting_down: AtomicBool::new(false),
                writer_wakeup: Notify::new(),
            }),
            config,
            connector: Box::new(connector),
            outgoing_rx: StdMutex::new(Some(outgoing_rx)),
            transport: StdMutex::new(None),
            progress: StdMutex::new(ProgressHandles {
                tasks: Vec::new(),
                thread: None,
            }),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.shared.client_state.borrow()
    }

    pub fn machine_id(&self) -> u64 {
        self.shared.machine_id
    }

    /// Instance ids allocated by the architect during registration.
    pub fn instance_ids(&self) -> Vec<u64> {
        self.shared
            .instance_ids
            .lock()
            .expect("instance id lock")
            .clone()
    }

    /// Blocks until the client has left `Disconnected`.
    pub async fn await_connected(&self) {
        let mut rx = self.shared.client_state.subscribe();
        while *rx.borrow_and_update() == ClientState::Disconnected {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn await_operational(&self) -> Result<(), ClientError> {
        let mut rx = self.shared.client_state.subscribe();
        loop {
            if self.shared.shutting_down.load(Ordering::SeqCst) {
                return Err(ClientError::NotReady);
            }
            match *rx.borrow_and_update() {
                ClientState::Operational => return Ok(()),
                ClientState::FailedToConnect => return Err(ClientError::NotReady),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(ClientError::NotReady);
            }
        }
    }

    /// Fire-and-forget event with a message payload.
    pub async fn issue_event<M: Payload>(
        &self,
        event_type: EventType,
        message: &M,
    ) -> Result<(), ClientError> {
        self.await_operational().await?;
        let payload = AnyPayload::pack(message)?;
        self.shared
            .send_event(Event::untagged(event_type, payload))
            .await
    }

    /// Fire-and-forget event without a payload.
    pub async fn issue_event_empty(&self, event_type: EventType) -> Result<(), ClientError> {
        self.await_operational().await?;
        self.shared
            .send_event(Event::untagged(event_type, AnyPayload::empty()))
            .await
    }

    /// Asks the architect for a fresh state update.
    pub async fn request_update(&self) -> Result<(), ClientError> {
        let request = RequestStateUpdate {
            machine_id: self.shared.machine_id,
        };
        self.issue_event(EventType::ClientEventRequestStateUpdate, &request)
            .await
    }

    /// Starts a unary request and returns the pending handle. Accepted
    /// only once the client is `Operational`; earlier callers wait, and
    /// fail with `NotReady` if shutdown intervenes.
    pub async fn async_unary<Resp, Req>(
        &self,
        event_type: EventType,
        request: &Req,
    ) -> Result<UnaryHandle<Resp>, ClientError>
    where
        Resp: Payload,
        Req: Payload,
    {
        self.await_operational().await?;
        send_unary(&self.shared, event_type, request).await
    }

    /// Synchronous convenience over [`async_unary`](Self::async_unary).
    pub async fn await_unary<Resp, Req>(
        &self,
        event_type: EventType,
        request: &Req,
    ) -> Result<Resp, ClientError>
    where
        Resp: Payload,
        Req: Payload,
    {
        self.async_unary::<Resp, Req>(event_type, request)
            .await?
            .await_response()
            .await
    }

    /// Subscribes to the state-update subject. The receiver observes
    /// the current snapshot immediately and every later one in
    /// publication order.
    pub fn state_updates(&self) -> StateUpdates {
        StateUpdates::new(self.shared.state_hub.subscribe())
    }

    pub fn state_update_count(&self) -> u64 {
        self.shared.state_hub.borrow().update_count
    }

    pub fn has_subscription_service(&self, name: &str) -> bool {
        self.shared
            .subscriptions
            .lock()
            .expect("subscription registry lock")
            .contains_key(name)
    }

    /// Returns the subscription service registered under `name`,
    /// creating and advertising it to the architect on first use.
    pub async fn get_or_create_subscription_service(
        &self,
        name: &str,
        roles: BTreeSet<String>,
    ) -> Result<Arc<SubscriptionService>, ClientError> {
        if let Some(existing) = self
            .shared
            .subscriptions
            .lock()
            .expect("subscription registry lock")
            .get(name)
        {
            return Ok(Arc::clone(existing));
        }
        self.await_operational().await?;
        let service = {
            let mut subscriptions = self
                .shared
                .subscriptions
                .lock()
                .expect("subscription registry lock");
            if let Some(existing) = subscriptions.get(name) {
                return Ok(Arc::clone(existing));
            }
            let service = Arc::new(SubscriptionService::new(name, roles.clone()));
            subscriptions.insert(name.to_string(), Arc::clone(&service));
            service
        };
        let request = SubscriptionServiceRegisterRequest {
            service_name: name.to_string(),
            roles,
            machine_id: self.shared.machine_id,
        };
        let payload = AnyPayload::pack(&request)?;
        self.shared
            .send_event(Event::untagged(
                EventType::ClientSubscriptionServiceRegister,
                payload,
            ))
            .await?;
        Ok(service)
    }

    /// Routes `InstanceError` events addressed to `instance_id` to the
    /// given handler.
    pub fn register_instance_handler(
        &self,
        instance_id: u64,
        handler: impl Fn(InstanceErrorNotice) + Send + Sync + 'static,
    ) {
        self.shared
            .instance_handlers
            .lock()
            .expect("instance handler lock")
            .insert(instance_id, Box::new(handler));
    }

    fn spawn_progress(
        &self,
        transport: Arc<dyn BidiTransport>,
        outgoing_rx: mpsc::Receiver<Event>,
    ) -> anyhow::Result<()> {
        let writer = writer_loop(Arc::clone(&transport), outgoing_rx, Arc::clone(&self.shared));
        let reader = reader_loop(
            Arc::clone(&transport),
            Arc::clone(&self.shared),
            Arc::clone(&self.core),
        );
        let mut progress = self.progress.lock().expect("progress handle lock");
        match &self.config.progress {
            ProgressMode::External(handle) => {
                progress.tasks.push(handle.spawn(writer));
                progress.tasks.push(handle.spawn(reader));
            }
            ProgressMode::Owned => {
                let (init_tx, init_rx) = crossbeam_channel::bounded::<anyhow::Result<()>>(1);
                let thread = std::thread::Builder::new()
                    .name("rill-control-progress".to_string())
                    .spawn(move || {
                        let runtime = tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build();
                        match runtime {
                            Ok(runtime) => {
                                let _ = init_tx.send(Ok(()));
                                runtime.block_on(async move {
                                    tokio::join!(writer, reader);
                                });
                            }
                            Err(e) => {
                                let _ = init_tx
                                    .send(Err(e).context("failed to build progress runtime"));
                            }
                        }
                    })
                    .context("failed to spawn control-plane progress thread")?;
                init_rx
                    .recv()
                    .context("progress engine init channel closed")??;
                progress.thread = Some(thread);
            }
        }
        Ok(())
    }
}

async fn writer_loop(
    transport: Arc<dyn BidiTransport>,
    mut outgoing_rx: mpsc::Receiver<Event>,
    shared: Arc<ClientShared>,
) {
    loop {
        tokio::select! {
            maybe = outgoing_rx.recv() => match maybe {
                Some(event) => {
                    if let Err(error) = transport.send(event).await {
                        warn!(%error, "control plane writer failed");
                        break;
                    }
                }
                None => break,
            },
            // Only stop, kill, and the reader's stream-end path ring
            // this bell; all of them mean the writer is done.
            _ = shared.writer_wakeup.notified() => break,
        }
    }
    debug!("control plane writer loop exited");
}

async fn reader_loop(
    transport: Arc<dyn BidiTransport>,
    shared: Arc<ClientShared>,
    core: Arc<ServiceCore>,
) {
    while let Some(event) = transport.recv().await {
        if handle_event(&shared, event).is_break() {
            break;
        }
    }

    let graceful = shared.shutting_down.load(Ordering::SeqCst);
    let pending: Vec<_> = {
        let mut pending = shared.pending.lock().expect("pending unary lock");
        pending.drain().collect()
    };
    for (tag, tx) in pending {
        debug!(tag, "completing pending unary after stream end");
        let _ = tx.send(Err(if graceful {
            ClientError::Shutdown
        } else {
            ClientError::Transport
        }));
    }
    if !graceful {
        warn!("control plane stream terminated unexpectedly");
        shared.set_client_state(ClientState::FailedToConnect);
    }
    // Wake gated callers so they observe the terminal state, and shut
    // the writer down with the stream.
    shared.client_state.send_modify(|_| {});
    shared.writer_wakeup.notify_one();
    if core.state() >= ServiceState::Running {
        core.advance_to(ServiceState::Stopping);
        core.advance_to(ServiceState::Stopped);
    }
    debug!("control plane reader loop exited");
}

fn handle_event(shared: &Arc<ClientShared>, event: Event) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    if event.tag != 0 {
        let pending = shared
            .pending
            .lock()
            .expect("pending unary lock")
            .remove(&event.tag);
        match pending {
            Some(tx) => {
                let result = match &event.error {
                    Some(error) => Err(ClientError::Remote {
                        message: error.message.clone(),
                    }),
                    None => Ok(event),
                };
                let _ = tx.send(result);
            }
            None => warn!(tag = event.tag, "late tagged response discarded"),
        }
        return ControlFlow::Continue(());
    }

    match event.event_type {
        EventType::ServerStateUpdate => match event.payload.unpack::<ControlPlaneState>() {
            Ok(state) => shared.publish_state(state),
            Err(error) => warn!(%error, "discarding undecodable state update"),
        },
        EventType::InstanceError => match event.payload.unpack::<InstanceErrorNotice>() {
            Ok(notice) => shared.route_instance_error(notice),
            Err(error) => warn!(%error, "discarding undecodable instance error"),
        },
        EventType::ServerError => {
            let message = event
                .error
                .map(|error| error.message)
                .unwrap_or_else(|| "unspecified server error".to_string());
            error!(message = %message, "architect reported a client error; disconnecting");
            shared.set_client_state(ClientState::FailedToConnect);
            return std::ops::ControlFlow::Break(());
        }
        other => warn!(event_type = ?other, "unexpected event type from architect"),
    }
    ControlFlow::Continue(())
}

#[async_trait]
impl Service for ControlPlaneClient {
    fn service_core(&self) -> &ServiceCore {
        &self.core
    }

    async fn do_start(&self) -> anyhow::Result<()> {
        let transport = match self.connector.connect().await {
            Ok(transport) => Arc::from(transport),
            Err(error) => {
                self.shared.set_client_state(ClientState::FailedToConnect);
                return Err(error.into());
            }
        };
        *self.transport.lock().expect("transport slot lock") = Some(Arc::clone(&transport));
        self.shared.set_client_state(ClientState::Connected);

        let outgoing_rx = self
            .outgoing_rx
            .lock()
            .expect("outgoing receiver lock")
            .take()
            .context("control plane client cannot be started twice")?;
        self.spawn_progress(transport, outgoing_rx)?;

        self.shared.set_client_state(ClientState::RegisteringWorkers);
        let request = RegisterWorkersRequest {
            machine_id: self.shared.machine_id,
            worker_addresses: self.config.worker_addresses.clone(),
        };
        let handle = send_unary::<RegisterWorkersResponse, _>(
            &self.shared,
            EventType::ClientRegisterWorkers,
            &request,
        )
        .await
        .map_err(|error| {
                self.shared.set_client_state(ClientState::FailedToConnect);
                anyhow::Error::from(error).context("worker registration send failed")
            })?;
        let response = handle
            .await_response_with_deadline(self.config.register_timeout)
            .await
            .map_err(|error| {
                self.shared.set_client_state(ClientState::FailedToConnect);
                anyhow::Error::from(error).context("worker registration failed")
            })?;
        info!(
            machine_id = response.machine_id,
            instances = response.instance_ids.len(),
            "registered workers with architect"
        );
        *self.shared.instance_ids.lock().expect("instance id lock") = response.instance_ids;
        self.shared.set_client_state(ClientState::Operational);
        Ok(())
    }

    async fn do_stop(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.writer_wakeup.notify_one();
        // Wake callers blocked on the operational gate.
        self.shared.client_state.send_modify(|_| {});
        let transport = self.transport.lock().expect("transport slot lock").take();
        if let Some(transport) = transport {
            transport.shutdown().await;
        }
        let (tasks, thread) = {
            let mut progress = self.progress.lock().expect("progress handle lock");
            (
                std::mem::take(&mut progress.tasks),
                progress.thread.take(),
            )
        };
        for task in tasks {
            let _ = task.await;
        }
        if let Some(thread) = thread {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }

    fn do_kill(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.writer_wakeup.notify_one();
        self.shared.client_state.send_modify(|_| {});
        let transport = self.transport.lock().expect("transport slot lock").take();
        if let Some(transport) = transport {
            let _ = rill_runtime::spawn(async move { transport.shutdown().await });
        }
        let mut progress = self.progress.lock().expect("progress handle lock");
        for task in progress.tasks.drain(..) {
            task.abort();
        }
        // An owned progress thread exits on its own once the transport
        // closes; it is detached rather than joined here.
        progress.thread.take();
    }
}

impl Drop for ControlPlaneClient {
    fn drop(&mut self) {
        let state = self.core.state();
        if state == ServiceState::Running {
            warn!("control plane client dropped while running; killing");
            self.service_kill();
        }
    }
}
