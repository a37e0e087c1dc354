use modwire_core::frame::{FrameBuffer, Framing, TcpFraming};
use modwire_core::pdu::{
    ExceptionCode, ExceptionResponse, FunctionCode, RegisterData, Request, Response,
};
use modwire_core::{DecodeError, ValidationError};

const READ_HOLDING_REQ: &[u8] = &[0x03, 0x00, 0x6B, 0x00, 0x03];
const READ_HOLDING_RESP: &[u8] = &[0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64];
const TCP_READ_HOLDING: &[u8] = &[
    0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x6B, 0x00, 0x03,
];

#[test]
fn fc03_request_golden_encode() {
    let request = Request::read_holding_registers(0x006B, 3).unwrap();
    assert_eq!(request.to_vec().unwrap(), READ_HOLDING_REQ);
}

#[test]
fn fc03_response_decode_and_helpers() {
    let response = Response::decode_expected(READ_HOLDING_RESP, FunctionCode::ReadHoldingRegisters)
        .unwrap()
        .unwrap();

    match response {
        Response::ReadHoldingRegisters(data) => {
            assert_eq!(data.len(), 3);
            assert_eq!(data.register(0), Some(0x022B));
            assert_eq!(data.register(1), Some(0x0000));
            assert_eq!(data.register(2), Some(0x0064));
            assert_eq!(data.register(3), None);
        }
        _ => panic!("expected read holding registers response"),
    }
}

#[test]
fn fc05_golden_encode() {
    assert_eq!(
        Request::write_single_coil(10, true).unwrap().to_vec().unwrap(),
        [0x05, 0x00, 0x0A, 0xFF, 0x00]
    );
    assert_eq!(
        Request::write_single_coil(10, false).unwrap().to_vec().unwrap(),
        [0x05, 0x00, 0x0A, 0x00, 0x00]
    );
}

#[test]
fn fc06_and_fc16_golden_encode() {
    assert_eq!(
        Request::write_single_register(1, 3).unwrap().to_vec().unwrap(),
        [0x06, 0x00, 0x01, 0x00, 0x03]
    );
    assert_eq!(
        Request::write_multiple_registers_bytes(1, &[0x00, 0x0A, 0x01, 0x02])
            .unwrap()
            .to_vec()
            .unwrap(),
        [0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
    );
}

#[test]
fn mbap_frame_roundtrip() {
    let frame = TcpFraming.encode(1, 1, READ_HOLDING_REQ).unwrap();
    assert_eq!(frame, TCP_READ_HOLDING);

    let mut buf = FrameBuffer::new();
    buf.extend(&frame);
    let decoded = buf.next_frame().unwrap().unwrap();
    assert_eq!(decoded.transaction_id, 1);
    assert_eq!(decoded.unit_id, 1);
    assert_eq!(decoded.pdu, READ_HOLDING_REQ);
}

#[test]
fn every_constructor_rejects_address_past_16_bits() {
    let address = 0x10000;
    let results = [
        Request::read_coils(address, 1),
        Request::read_discrete_inputs(address, 1),
        Request::read_holding_registers(address, 1),
        Request::read_input_registers(address, 1),
        Request::write_single_coil(address, true),
        Request::write_single_register(address, 0),
        Request::write_multiple_coils(address, &[true]),
        Request::write_multiple_coils_packed(address, &[0x01], None),
        Request::write_multiple_registers(address, &[1]),
        Request::write_multiple_registers_bytes(address, &[0, 1]),
    ];
    for result in results {
        assert_eq!(result.unwrap_err(), ValidationError::InvalidStartAddress);
    }
}

#[test]
fn oversized_coil_array_is_rejected() {
    let coils = vec![true; 15760];
    assert_eq!(
        Request::write_multiple_coils(0, &coils).unwrap_err(),
        ValidationError::InvalidArraySize
    );
    assert!(Request::write_multiple_coils(0, &coils[..1968]).is_ok());
}

#[test]
fn exception_roundtrip() {
    let bytes = [0x83u8, 0x02];
    assert_eq!(
        Response::decode_expected(&bytes, FunctionCode::ReadHoldingRegisters).unwrap(),
        None
    );
    let decoded = ExceptionResponse::decode_expected(&bytes, FunctionCode::ReadHoldingRegisters)
        .unwrap()
        .unwrap();
    assert_eq!(decoded.code, ExceptionCode::IllegalDataAddress);

    let mut w = modwire_core::encoding::Writer::new(8);
    decoded.encode(&mut w).unwrap();
    assert_eq!(w.as_bytes(), &bytes);
}

#[test]
fn register_response_with_odd_byte_count_is_rejected() {
    assert_eq!(
        Response::decode(&[0x03, 0x03, 0x00, 0x01, 0x02]).unwrap_err(),
        DecodeError::InvalidLength
    );
    let ok = Response::ReadInputRegisters(RegisterData::new(vec![7]).unwrap());
    assert_eq!(ok.to_vec().unwrap(), [0x04, 0x02, 0x00, 0x07]);
}
