//! The per-client actor.
//!
//! One task owns the lifecycle, the pending table, the transaction-id
//! counter and the write half of the stream. Everything else talks to it
//! through channels.

use crate::lifecycle::{Action, ConnectionState, Lifecycle, LifecycleEvent};
use crate::pending::{PendingTable, Reply, UserRequest, deadline_after};
use crate::{ClientConfig, ClientError, ConnectionOptions};
use modwire_core::pdu::Request;
use modwire_datalink::{
    Connector, Endpoint, FrameWriter, LinkEvent, LinkMessage, TransactionIds, spawn_reader,
};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::WriteHalf;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

pub(crate) enum Command {
    Submit {
        request: Request,
        timeout: Option<Duration>,
        created_at: Instant,
        reply: Reply,
    },
    Connect,
    Disconnect,
    SetOptions(ConnectionOptions),
}

struct Connected<S> {
    generation: u64,
    result: io::Result<S>,
}

pub(crate) struct Engine<C: Connector> {
    connector: Arc<C>,
    endpoint: Endpoint,
    unit_id: u8,
    response_timeout: Duration,
    lifecycle: Lifecycle,
    pending: PendingTable,
    queue: VecDeque<UserRequest>,
    ids: TransactionIds,
    writer: Option<FrameWriter<WriteHalf<C::Stream>>>,
    reader: Option<JoinHandle<()>>,
    generation: u64,
    link_tx: mpsc::UnboundedSender<LinkMessage>,
    link_rx: mpsc::UnboundedReceiver<LinkMessage>,
    connect_tx: mpsc::UnboundedSender<Connected<C::Stream>>,
    connect_rx: mpsc::UnboundedReceiver<Connected<C::Stream>>,
    reconnect_at: Option<Instant>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<C: Connector> Engine<C> {
    pub(crate) fn new(
        connector: C,
        config: &ClientConfig,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        Self {
            connector: Arc::new(connector),
            endpoint: config.endpoint(),
            unit_id: config.unit_id,
            response_timeout: config.response_timeout,
            lifecycle: Lifecycle::new(config.retry_delay),
            pending: PendingTable::new(),
            queue: VecDeque::new(),
            ids: TransactionIds::new(),
            writer: None,
            reader: None,
            generation: 0,
            link_tx,
            link_rx,
            connect_tx,
            connect_rx,
            reconnect_at: None,
            state_tx,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        auto_connect: bool,
    ) {
        if auto_connect {
            self.apply(LifecycleEvent::ConnectRequested).await;
        }

        loop {
            let deadline = self.pending.next_deadline();
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(message) = self.link_rx.recv() => self.on_link(message).await,
                Some(connected) = self.connect_rx.recv() => self.on_connected(connected).await,
                _ = sleep_until_some(deadline) => {
                    self.pending.expire(Instant::now());
                }
                _ = sleep_until_some(reconnect_at) => {
                    self.reconnect_at = None;
                    self.apply(LifecycleEvent::RetryElapsed).await;
                }
            }
        }

        debug!("client dropped, stopping engine");
        self.close_transport().await;
        self.reject_everything(ClientError::EngineStopped);
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                request,
                timeout,
                created_at,
                reply,
            } => {
                let user = UserRequest::new(
                    request,
                    self.unit_id,
                    timeout.unwrap_or(self.response_timeout),
                    created_at,
                    reply,
                );
                self.submit(user).await;
            }
            Command::Connect => self.apply(LifecycleEvent::ConnectRequested).await,
            Command::Disconnect => {
                self.reconnect_at = None;
                self.apply(LifecycleEvent::DisconnectRequested).await;
            }
            Command::SetOptions(options) => self.set_options(options).await,
        }
    }

    async fn submit(&mut self, user: UserRequest) {
        match self.lifecycle.state() {
            ConnectionState::Online => {
                if let Some(event) = self.dispatch(user).await {
                    self.apply(event).await;
                }
            }
            ConnectionState::Connecting => self.queue.push_back(user),
            ConnectionState::Offline | ConnectionState::Closing => {
                user.fail(ClientError::NotConnected);
            }
        }
    }

    async fn set_options(&mut self, options: ConnectionOptions) {
        if let Some(unit_id) = options.unit_id {
            self.unit_id = unit_id;
        }
        if let Some(timeout) = options.response_timeout {
            self.response_timeout = timeout;
        }
        if let Some(endpoint) = options.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(delay) = options.retry_delay {
            self.apply(LifecycleEvent::SetRetryDelay(delay)).await;
        }
    }

    /// Write one request frame. A failed write tears the transport down and
    /// yields the event the lifecycle must see.
    async fn dispatch(&mut self, user: UserRequest) -> Option<LifecycleEvent> {
        let pending = &self.pending;
        let Some(transaction_id) = self.ids.next_free(|id| pending.contains(id)) else {
            user.fail(ClientError::TransactionIdsExhausted);
            return None;
        };
        let pdu = match user.request().to_vec() {
            Ok(pdu) => pdu,
            Err(err) => {
                user.fail(err.into());
                return None;
            }
        };
        let Some(writer) = self.writer.as_mut() else {
            user.fail(ClientError::NotConnected);
            return None;
        };

        let unit_id = user.unit_id();
        debug!(
            transaction_id,
            unit_id,
            function = user.request().function_code().name(),
            pdu_len = pdu.len(),
            "dispatching modbus request"
        );
        self.pending.register(transaction_id, user, Instant::now());

        let sent = writer.send(transaction_id, unit_id, &pdu).await;
        match sent {
            Ok(()) => None,
            Err(err) => {
                warn!(transaction_id, error = %err, "modbus write failed");
                self.close_transport().await;
                Some(LifecycleEvent::TransportFailed)
            }
        }
    }

    async fn on_link(&mut self, message: LinkMessage) {
        if message.generation != self.generation || self.writer.is_none() {
            debug!(generation = message.generation, "ignoring event from old connection");
            return;
        }
        match message.event {
            LinkEvent::Frame(frame) => {
                self.pending.resolve(
                    frame.transaction_id,
                    frame.unit_id,
                    &frame.pdu,
                    Instant::now(),
                );
            }
            LinkEvent::Closed => {
                warn!(endpoint = %self.endpoint, "modbus connection closed by peer");
                self.close_transport().await;
                self.apply(LifecycleEvent::TransportClosed).await;
            }
            LinkEvent::Failed(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "modbus connection failed");
                self.close_transport().await;
                self.apply(LifecycleEvent::TransportFailed).await;
            }
        }
    }

    async fn on_connected(&mut self, connected: Connected<C::Stream>) {
        if connected.generation != self.generation {
            debug!(generation = connected.generation, "dropping outdated connect attempt");
            return;
        }
        match connected.result {
            Ok(stream) => {
                let (read_half, write_half) = tokio::io::split(stream);
                self.reader = Some(spawn_reader(
                    read_half,
                    self.generation,
                    self.link_tx.clone(),
                ));
                self.writer = Some(FrameWriter::new(write_half));
                debug!(endpoint = %self.endpoint, "modbus transport connected");
                self.apply(LifecycleEvent::TransportConnected).await;
            }
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "modbus connect failed");
                self.apply(LifecycleEvent::TransportFailed).await;
            }
        }
    }

    /// Feed `event` to the lifecycle and carry out the resulting actions,
    /// including any follow-up events those actions produce.
    async fn apply(&mut self, event: LifecycleEvent) {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            let actions = self.lifecycle.handle(event);
            self.publish_state();
            for action in actions {
                if let Some(next) = self.perform(action).await {
                    events.push_back(next);
                }
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Option<LifecycleEvent> {
        match action {
            Action::OpenTransport => {
                self.open_transport();
                None
            }
            Action::FlushQueued => {
                while self.writer.is_some() {
                    let Some(user) = self.queue.pop_front() else {
                        break;
                    };
                    if let Some(event) = self.dispatch(user).await {
                        return Some(event);
                    }
                }
                None
            }
            Action::RejectPending => {
                self.reject_everything(ClientError::ConnectionClosed);
                None
            }
            Action::ScheduleReconnect(delay) => {
                warn!(
                    endpoint = %self.endpoint,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling modbus reconnect"
                );
                self.reconnect_at = Some(deadline_after(Instant::now(), delay));
                None
            }
            Action::CloseTransport => {
                if self.close_transport().await {
                    Some(LifecycleEvent::TransportClosed)
                } else {
                    None
                }
            }
        }
    }

    fn open_transport(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let results = self.connect_tx.clone();
        debug!(%endpoint, generation, "opening modbus transport");

        tokio::spawn(async move {
            let result = connector.connect(&endpoint).await;
            let _ = results.send(Connected { generation, result });
        });
    }

    /// Drop the current stream, if any. Returns whether one was open.
    async fn close_transport(&mut self) -> bool {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let Some(mut writer) = self.writer.take() else {
            return false;
        };
        if let Err(err) = writer.shutdown().await {
            debug!(error = %err, "shutdown of modbus stream failed");
        }
        // Anything still in flight from this stream is stale from here on.
        self.generation += 1;
        true
    }

    fn reject_everything(&mut self, err: ClientError) {
        self.pending.reject_all(err.clone());
        for user in self.queue.drain(..) {
            user.fail(err.clone());
        }
    }

    fn publish_state(&self) {
        let state = self.lifecycle.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(%state, "connection state changed");
            *current = state;
            true
        });
    }
}

async fn sleep_until_some(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
