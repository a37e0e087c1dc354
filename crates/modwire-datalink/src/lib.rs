//! Async stream transport for Modbus TCP.
//!
//! Provides the connection seam ([`Connector`]), the framed write half
//! ([`FrameWriter`]), a reader task that reassembles frames into
//! [`LinkEvent`]s, transaction-id allocation, and a small server plus
//! in-memory device used as a test fixture.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use modwire_core::{DecodeError, EncodeError};
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

pub mod link;
pub mod server;
pub mod sim;

pub use link::{FrameWriter, LinkEvent, LinkMessage, TransactionIds, spawn_reader};
pub use server::{ModbusService, ModbusTcpServer, ServiceError, serve_connection};
pub use sim::{DeviceImage, InMemoryModbusService, PointTable};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 502;

#[derive(Debug, Error)]
pub enum DataLinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("protocol error: {0}")]
    Protocol(&'static str),
}

/// Where a connector should dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens byte streams to a device.
///
/// The client engine calls this on every connect and reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn connect(&self, endpoint: &Endpoint) -> std::io::Result<Self::Stream>;
}

/// Plain TCP with Nagle disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, endpoint: &Endpoint) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        debug!(%endpoint, "tcp connection established");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::{Connector, Endpoint, TcpConnector};
    use tokio::net::TcpListener;

    #[test]
    fn endpoint_defaults_to_local_modbus_port() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.to_string(), "127.0.0.1:502");
    }

    #[tokio::test]
    async fn tcp_connector_sets_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = TcpConnector
            .connect(&Endpoint::new("127.0.0.1", port))
            .await
            .unwrap();
        assert!(stream.nodelay().unwrap());
        let _ = listener.accept().await.unwrap();
    }

    #[tokio::test]
    async fn tcp_connector_reports_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(TcpConnector.connect(&Endpoint::new("127.0.0.1", port)).await.is_err());
    }
}
