use modwire_core::frame::{FrameBuffer, Framing, TcpFraming};
use modwire_core::pdu::{FunctionCode, Request, Response};
use modwire_datalink::{InMemoryModbusService, ModbusTcpServer};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(InMemoryModbusService::new(64, 64, 64, 64));
    service.set_holding_register(0, 1234)?;

    let server = ModbusTcpServer::bind("127.0.0.1:0", Arc::clone(&service)).await?;
    let addr = server.local_addr()?;
    let server_task = tokio::spawn(server.run());

    let request = Request::read_holding_registers(0, 1)?;
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&TcpFraming.encode(1, 1, &request.to_vec()?)?).await?;

    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; 260];
    let frame = loop {
        if let Some(frame) = frames.next_frame()? {
            break frame;
        }
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err("server closed the connection".into());
        }
        frames.extend(&chunk[..read]);
    };

    let response = Response::decode_expected(&frame.pdu, FunctionCode::ReadHoldingRegisters)?;
    println!("transaction {} -> {response:?}", frame.transaction_id);

    server_task.abort();
    let _ = server_task.await;
    Ok(())
}
