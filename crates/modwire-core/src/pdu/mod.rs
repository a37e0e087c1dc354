//! Typed PDU bodies and the per-function codec.

pub mod exception;
pub mod function_code;
pub mod request;
pub mod response;

pub use exception::{ExceptionCode, ExceptionResponse};
pub use function_code::FunctionCode;
pub use request::{
    MAX_ADDRESS, MAX_COIL_BUFFER_LEN, MAX_PDU_LEN, MAX_READ_BITS, MAX_READ_REGISTERS,
    MAX_WRITE_COILS, MAX_WRITE_REGISTERS, ReadRange, Request, WriteMultipleCoils,
    WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
};
pub use response::{BitStatus, MAX_READ_PAYLOAD, RegisterData, Response, WriteAck};
