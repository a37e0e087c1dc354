use modwire_core::frame::{Framing, TcpFraming};
use modwire_core::pdu::{FunctionCode, Request, Response};

fn main() {
    let request = match Request::read_holding_registers(0x006B, 2) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("invalid request: {err}");
            return;
        }
    };

    match request.to_vec().and_then(|pdu| TcpFraming.encode(1, 1, &pdu)) {
        Ok(frame) => println!("encoded request frame: {frame:02X?}"),
        Err(err) => eprintln!("encode failed: {err}"),
    }

    let response_bytes = [0x03, 0x04, 0x00, 0x2A, 0x00, 0x64];
    match Response::decode_expected(&response_bytes, FunctionCode::ReadHoldingRegisters) {
        Ok(Some(Response::ReadHoldingRegisters(data))) => {
            for (idx, value) in data.values().iter().enumerate() {
                println!("register[{idx}] = {value}");
            }
        }
        Ok(other) => println!("unexpected response: {other:?}"),
        Err(err) => eprintln!("decode failed: {err}"),
    }
}
