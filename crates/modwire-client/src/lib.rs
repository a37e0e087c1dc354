//! Event-driven Modbus TCP client.
//!
//! [`ModbusClient`] is a cheap handle onto a background engine task that owns
//! the connection. Every operation validates its arguments synchronously and
//! returns a [`ResponseHandle`], a future resolving once the matching
//! response arrives, the request times out or the connection goes away.
//! Requests are correlated by MBAP transaction id, so many can be in flight
//! at once.

#![forbid(unsafe_code)]

mod engine;
pub mod lifecycle;
pub mod pending;

pub use lifecycle::{Action, ConnectionState, Lifecycle, LifecycleEvent};
pub use pending::{Completion, PendingTable, RequestMetrics, UserRequest};

use engine::{Command, Engine};
use modwire_core::pdu::{ExceptionResponse, Request};
use modwire_core::{DecodeError, EncodeError, ValidationError};
use modwire_datalink::{Connector, DEFAULT_HOST, DEFAULT_PORT, Endpoint, TcpConnector};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

pub const DEFAULT_UNIT_ID: u8 = 1;
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub response_timeout: Duration,
    pub retry_delay: Duration,
    /// Start connecting as soon as the client is created.
    pub auto_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            unit_id: DEFAULT_UNIT_ID,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            auto_connect: true,
        }
    }
}

impl ClientConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

/// Settings that can change on a running client. Unset fields keep their
/// current value; a new endpoint is used from the next connect attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub endpoint: Option<Endpoint>,
    pub unit_id: Option<u8>,
    pub response_timeout: Option<Duration>,
    pub retry_delay: Option<Duration>,
}

impl ConnectionOptions {
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("modbus exception: {0}")]
    Exception(ExceptionResponse),
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("not connected")]
    NotConnected,
    #[error("all transaction ids are in use")]
    TransactionIdsExhausted,
    #[error("client engine stopped")]
    EngineStopped,
}

/// Resolves to the outcome of one request.
///
/// Dropping the handle discards the result; the request itself still runs
/// to completion or timeout.
#[derive(Debug)]
#[must_use = "a response handle does nothing unless awaited"]
pub struct ResponseHandle {
    rx: oneshot::Receiver<Result<Completion, ClientError>>,
}

impl Future for ResponseHandle {
    type Output = Result<Completion, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(ClientError::EngineStopped)))
    }
}

/// Handle onto a client engine. Clones share the same connection; the
/// engine stops once every clone is dropped.
#[derive(Debug, Clone)]
pub struct ModbusClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ModbusClient {
    /// Spawn an engine using `connector`. Must be called inside a tokio
    /// runtime.
    pub fn new<C: Connector>(connector: C, config: ClientConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Offline);
        let auto_connect = config.auto_connect;
        let engine = Engine::new(connector, &config, state_tx);
        tokio::spawn(engine.run(command_rx, auto_connect));
        Self { commands, state }
    }

    /// Spawn an engine dialling plain TCP.
    pub fn tcp(config: ClientConfig) -> Self {
        Self::new(TcpConnector, config)
    }

    pub fn read_coils(
        &self,
        start: u32,
        quantity: u16,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        self.submit(Request::read_coils(start, quantity)?, timeout)
    }

    pub fn read_discrete_inputs(
        &self,
        start: u32,
        quantity: u16,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        self.submit(Request::read_discrete_inputs(start, quantity)?, timeout)
    }

    pub fn read_holding_registers(
        &self,
        start: u32,
        quantity: u16,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        self.submit(Request::read_holding_registers(start, quantity)?, timeout)
    }

    pub fn read_input_registers(
        &self,
        start: u32,
        quantity: u16,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        self.submit(Request::read_input_registers(start, quantity)?, timeout)
    }

    pub fn write_single_coil(
        &self,
        address: u32,
        value: bool,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        self.submit(Request::write_single_coil(address, value)?, timeout)
    }

    pub fn write_single_register(
        &self,
        address: u32,
        value: u16,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        self.submit(Request::write_single_register(address, value)?, timeout)
    }

    pub fn write_multiple_coils(
        &self,
        start: u32,
        values: &[bool],
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        self.submit(Request::write_multiple_coils(start, values)?, timeout)
    }

    /// Write coils from a packed buffer (bit `i` in bit `i % 8` of byte
    /// `i / 8`). Without `quantity`, every bit of the buffer is written.
    pub fn write_multiple_coils_packed(
        &self,
        start: u32,
        packed: &[u8],
        quantity: Option<u16>,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        self.submit(
            Request::write_multiple_coils_packed(start, packed, quantity)?,
            timeout,
        )
    }

    pub fn write_multiple_registers(
        &self,
        start: u32,
        values: &[u16],
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        self.submit(Request::write_multiple_registers(start, values)?, timeout)
    }

    /// Write registers from raw big-endian bytes.
    pub fn write_multiple_registers_bytes(
        &self,
        start: u32,
        bytes: &[u8],
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        self.submit(Request::write_multiple_registers_bytes(start, bytes)?, timeout)
    }

    /// Send an already validated request. `timeout` overrides the configured
    /// response timeout for this request only.
    pub fn submit(
        &self,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<ResponseHandle, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            request,
            timeout,
            created_at: Instant::now(),
            reply,
        })?;
        Ok(ResponseHandle { rx })
    }

    pub fn connect(&self) -> Result<(), ClientError> {
        self.send(Command::Connect)
    }

    /// Close the connection and stay offline until [`connect`](Self::connect)
    /// is called again. Pending requests fail with `ConnectionClosed`.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Disconnect)
    }

    pub fn set_options(&self, options: ConnectionOptions) -> Result<(), ClientError> {
        self.send(Command::SetOptions(options))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<(), ClientError> {
        let mut rx = self.state.clone();
        rx.wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::EngineStopped)
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::EngineStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientConfig, ClientError, ConnectionOptions, ModbusClient};
    use modwire_core::ValidationError;
    use modwire_datalink::{Connector, Endpoint};
    use std::time::Duration;
    use tokio::io::DuplexStream;

    struct NeverConnects;

    #[async_trait::async_trait]
    impl Connector for NeverConnects {
        type Stream = DuplexStream;

        async fn connect(&self, _endpoint: &Endpoint) -> std::io::Result<DuplexStream> {
            Err(std::io::ErrorKind::ConnectionRefused.into())
        }
    }

    #[test]
    fn config_defaults_and_builders() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 502);
        assert_eq!(config.unit_id, 1);
        assert_eq!(config.response_timeout, Duration::from_millis(5000));
        assert_eq!(config.retry_delay, Duration::from_millis(5000));
        assert!(config.auto_connect);

        let config = config
            .with_host("10.0.0.2")
            .with_port(1502)
            .with_unit_id(17)
            .with_response_timeout(Duration::from_millis(250))
            .with_retry_delay(Duration::from_secs(1))
            .with_auto_connect(false);
        assert_eq!(config.endpoint(), Endpoint::new("10.0.0.2", 1502));
        assert_eq!(config.unit_id, 17);
        assert!(!config.auto_connect);

        let options = ConnectionOptions::default().with_unit_id(3);
        assert_eq!(options.unit_id, Some(3));
        assert_eq!(options.endpoint, None);
    }

    #[tokio::test]
    async fn validation_errors_surface_before_io() {
        let client = ModbusClient::new(
            NeverConnects,
            ClientConfig::default().with_auto_connect(false),
        );
        assert!(matches!(
            client.read_coils(0x10000, 1, None),
            Err(ClientError::Validation(ValidationError::InvalidStartAddress))
        ));
        assert!(matches!(
            client.write_multiple_coils(0, &vec![true; 15760], None),
            Err(ClientError::Validation(ValidationError::InvalidArraySize))
        ));
        assert!(matches!(
            client.write_multiple_registers_bytes(0, &[1, 2, 3], None),
            Err(ClientError::Validation(ValidationError::InvalidBufferSize))
        ));
    }

    #[tokio::test]
    async fn offline_requests_are_rejected() {
        let client = ModbusClient::new(
            NeverConnects,
            ClientConfig::default().with_auto_connect(false),
        );
        let handle = client.read_holding_registers(0, 1, None).unwrap();
        assert!(matches!(handle.await, Err(ClientError::NotConnected)));
    }
}
