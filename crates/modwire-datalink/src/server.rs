use crate::DataLinkError;
use crate::link::FrameWriter;
use modwire_core::DecodeError;
use modwire_core::encoding::Writer;
use modwire_core::frame::FrameBuffer;
use modwire_core::pdu::{ExceptionCode, ExceptionResponse, FunctionCode, Request, Response};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("modbus exception: {0:?}")]
    Exception(ExceptionCode),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
}

pub trait ModbusService: Send + Sync + 'static {
    /// Answer a decoded request addressed to `unit_id`.
    fn handle(&self, unit_id: u8, request: &Request) -> Result<Response, ServiceError>;
}

impl<T> ModbusService for Arc<T>
where
    T: ModbusService + ?Sized,
{
    fn handle(&self, unit_id: u8, request: &Request) -> Result<Response, ServiceError> {
        (**self).handle(unit_id, request)
    }
}

/// Accepts TCP connections and serves each with [`serve_connection`].
pub struct ModbusTcpServer<S> {
    listener: TcpListener,
    service: Arc<S>,
}

impl<S: ModbusService> ModbusTcpServer<S> {
    pub async fn bind<A: ToSocketAddrs>(addr: A, service: S) -> Result<Self, DataLinkError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, service))
    }

    pub fn from_listener(listener: TcpListener, service: S) -> Self {
        Self {
            listener,
            service: Arc::new(service),
        }
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, DataLinkError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<(), DataLinkError> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            socket.set_nodelay(true)?;
            let service = Arc::clone(&self.service);

            tokio::spawn(async move {
                if let Err(err) = serve_connection(socket, service).await {
                    warn!(%peer, error = %err, "modbus tcp server connection ended with error");
                }
            });
        }
    }
}

/// Serve Modbus TCP requests on one stream until the peer hangs up.
/// Hanging up in the middle of a frame is reported as
/// [`DataLinkError::ConnectionClosed`].
///
/// Works over any byte stream, so tests can drive it through an in-memory
/// duplex pipe.
pub async fn serve_connection<T, S>(stream: T, service: S) -> Result<(), DataLinkError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: ModbusService,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let mut writer = FrameWriter::new(writer);
    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; 512];

    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            if frames.buffered() > 0 {
                return Err(DataLinkError::ConnectionClosed);
            }
            return Ok(());
        }
        frames.extend(&chunk[..read]);

        while let Some(frame) = frames.next_frame()? {
            let Some(&first) = frame.pdu.first() else {
                return Err(DataLinkError::Protocol("empty request pdu"));
            };
            debug!(
                transaction_id = frame.transaction_id,
                unit_id = frame.unit_id,
                function = first,
                pdu_len = frame.pdu.len(),
                "received modbus tcp request"
            );

            let reply = match Request::decode(&frame.pdu) {
                Ok(request) => match service.handle(frame.unit_id, &request) {
                    Ok(response) => response.to_vec()?,
                    Err(ServiceError::Exception(code)) => {
                        exception_pdu(request.function_code(), code)?
                    }
                    Err(ServiceError::InvalidRequest(reason)) => {
                        warn!(reason, "service rejected request");
                        exception_pdu(request.function_code(), ExceptionCode::IllegalDataValue)?
                    }
                },
                Err(err) => match FunctionCode::from_u8(first) {
                    Ok(function) => exception_pdu(function, map_decode_error_to_exception(err))?,
                    Err(_) => raw_exception_pdu(first, ExceptionCode::IllegalFunction),
                },
            };
            writer.send(frame.transaction_id, frame.unit_id, &reply).await?;
        }
    }
}

fn map_decode_error_to_exception(err: DecodeError) -> ExceptionCode {
    match err {
        DecodeError::InvalidFunctionCode => ExceptionCode::IllegalFunction,
        DecodeError::InvalidLength
        | DecodeError::InvalidValue
        | DecodeError::UnexpectedEof
        | DecodeError::TrailingBytes => ExceptionCode::IllegalDataValue,
        DecodeError::InvalidProtocolId => ExceptionCode::ServerDeviceFailure,
    }
}

fn exception_pdu(function: FunctionCode, code: ExceptionCode) -> Result<Vec<u8>, DataLinkError> {
    let mut w = Writer::new(ExceptionResponse::ENCODED_LEN);
    ExceptionResponse { function, code }.encode(&mut w)?;
    Ok(w.into_vec())
}

fn raw_exception_pdu(function: u8, code: ExceptionCode) -> Vec<u8> {
    vec![(function & 0x7F) | 0x80, code.as_u8()]
}

#[cfg(test)]
mod tests {
    use super::{ModbusService, ModbusTcpServer, ServiceError, serve_connection};
    use crate::DataLinkError;
    use modwire_core::frame::{FrameBuffer, Framing, TcpFraming};
    use modwire_core::pdu::{ExceptionCode, RegisterData, Request, Response};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct EchoReadService;

    impl ModbusService for EchoReadService {
        fn handle(&self, _unit_id: u8, request: &Request) -> Result<Response, ServiceError> {
            match request {
                Request::ReadHoldingRegisters(_) => Ok(Response::ReadHoldingRegisters(
                    RegisterData::new(vec![0x002A]).unwrap(),
                )),
                _ => Err(ServiceError::Exception(ExceptionCode::IllegalFunction)),
            }
        }
    }

    struct AlwaysExceptionService;

    impl ModbusService for AlwaysExceptionService {
        fn handle(&self, _unit_id: u8, _request: &Request) -> Result<Response, ServiceError> {
            Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress))
        }
    }

    async fn read_reply<R: AsyncRead + Unpin>(stream: &mut R) -> (u16, Vec<u8>) {
        let mut frames = FrameBuffer::new();
        let mut chunk = [0u8; 64];
        loop {
            if let Some(frame) = frames.next_frame().unwrap() {
                return (frame.transaction_id, frame.pdu);
            }
            let read = stream.read(&mut chunk).await.unwrap();
            assert!(read > 0, "server closed early");
            frames.extend(&chunk[..read]);
        }
    }

    #[tokio::test]
    async fn tcp_server_handles_basic_read_request() {
        let server = ModbusTcpServer::bind("127.0.0.1:0", EchoReadService)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let frame = TcpFraming.encode(1, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]).unwrap();
        stream.write_all(&frame).await.unwrap();
        assert_eq!(read_reply(&mut stream).await, (1, vec![0x03, 0x02, 0x00, 0x2A]));

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn duplex_connection_sends_exception_response() {
        let (client, server) = tokio::io::duplex(256);
        let task = tokio::spawn(serve_connection(server, AlwaysExceptionService));
        let (mut rd, mut wr) = tokio::io::split(client);

        let frame = TcpFraming.encode(7, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]).unwrap();
        wr.write_all(&frame).await.unwrap();
        assert_eq!(read_reply(&mut rd).await, (7, vec![0x83, 0x02]));

        drop(wr);
        drop(rd);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_request_maps_to_exception() {
        let (client, server) = tokio::io::duplex(256);
        let task = tokio::spawn(serve_connection(server, EchoReadService));
        let (mut rd, mut wr) = tokio::io::split(client);

        let bad_quantity = TcpFraming.encode(2, 1, &[0x03, 0x00, 0x00, 0x00, 0x00]).unwrap();
        wr.write_all(&bad_quantity).await.unwrap();
        assert_eq!(read_reply(&mut rd).await, (2, vec![0x83, 0x03]));

        let unknown = TcpFraming.encode(3, 1, &[0x2B, 0x0E, 0x01, 0x00]).unwrap();
        wr.write_all(&unknown).await.unwrap();
        assert_eq!(read_reply(&mut rd).await, (3, vec![0xAB, 0x01]));

        drop(wr);
        drop(rd);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn truncated_request_reports_closed_connection() {
        let (mut client, server) = tokio::io::duplex(256);
        let task = tokio::spawn(serve_connection(server, EchoReadService));

        let frame = TcpFraming.encode(5, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]).unwrap();
        client.write_all(&frame[..8]).await.unwrap();
        drop(client);

        assert!(matches!(
            task.await.unwrap(),
            Err(DataLinkError::ConnectionClosed)
        ));
    }
}
