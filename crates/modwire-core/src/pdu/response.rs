use crate::bits;
use crate::encoding::{Reader, Writer};
use crate::pdu::request::{
    MAX_PDU_LEN, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
    checked_span,
};
use crate::pdu::{FunctionCode, Request, WriteSingleCoil, WriteSingleRegister};
use crate::{DecodeError, EncodeError, ValidationError};
use alloc::vec::Vec;

/// Largest byte count a read response may carry.
pub const MAX_READ_PAYLOAD: usize = 250;

/// Packed coil or discrete-input status as returned by FC01/FC02.
///
/// The device pads the last byte with zeros; the caller knows how many bits
/// it asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitStatus {
    packed: Vec<u8>,
}

impl BitStatus {
    pub fn from_bits(values: &[bool]) -> Result<Self, ValidationError> {
        if values.is_empty() || values.len() > usize::from(MAX_READ_BITS) {
            return Err(ValidationError::InvalidQuantity);
        }
        Ok(Self {
            packed: bits::pack(values),
        })
    }

    pub fn from_packed(packed: Vec<u8>) -> Result<Self, ValidationError> {
        if packed.is_empty() || packed.len() > MAX_READ_PAYLOAD {
            return Err(ValidationError::InvalidBufferSize);
        }
        Ok(Self { packed })
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    pub fn bit(&self, index: usize) -> Option<bool> {
        bits::bit(&self.packed, index)
    }

    /// First `quantity` bits; shorter if the payload holds fewer.
    pub fn bits(&self, quantity: usize) -> Vec<bool> {
        bits::unpack(&self.packed, quantity)
    }

    pub fn capacity(&self) -> usize {
        self.packed.len() * 8
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let byte_count = usize::from(r.read_u8()?);
        if byte_count == 0 || byte_count > MAX_READ_PAYLOAD {
            return Err(DecodeError::InvalidLength);
        }
        Ok(Self {
            packed: r.take(byte_count)?.to_vec(),
        })
    }

    fn encode_body(&self, w: &mut Writer) -> Result<(), EncodeError> {
        let byte_count = u8::try_from(self.packed.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
        w.write_u8(byte_count)?;
        w.write_all(&self.packed)
    }
}

/// Register words returned by FC03/FC04.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterData {
    values: Vec<u16>,
}

impl RegisterData {
    pub fn new(values: Vec<u16>) -> Result<Self, ValidationError> {
        if values.is_empty() || values.len() > usize::from(MAX_READ_REGISTERS) {
            return Err(ValidationError::InvalidQuantity);
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[u16] {
        &self.values
    }

    pub fn register(&self, index: usize) -> Option<u16> {
        self.values.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let byte_count = usize::from(r.read_u8()?);
        if byte_count == 0 || byte_count % 2 != 0 || byte_count > MAX_READ_PAYLOAD {
            return Err(DecodeError::InvalidLength);
        }
        let values = r
            .take(byte_count)?
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self { values })
    }

    fn encode_body(&self, w: &mut Writer) -> Result<(), EncodeError> {
        let byte_count =
            u8::try_from(self.values.len() * 2).map_err(|_| EncodeError::ValueOutOfRange)?;
        w.write_u8(byte_count)?;
        w.write_be_words(&self.values)
    }
}

/// Echo of a multiple-write: start address and quantity written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteAck {
    pub start_address: u16,
    pub quantity: u16,
}

impl WriteAck {
    fn decode_body(r: &mut Reader<'_>, max: u16) -> Result<Self, DecodeError> {
        let start_address = r.read_be_u16()?;
        let quantity = r.read_be_u16()?;
        checked_span(start_address, quantity, max).map_err(|_| DecodeError::InvalidValue)?;
        Ok(Self {
            start_address,
            quantity,
        })
    }

    fn encode_body(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_be_u16(self.start_address)?;
        w.write_be_u16(self.quantity)
    }
}

/// A successful response body, keyed by function code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Response {
    ReadCoils(BitStatus),
    ReadDiscreteInputs(BitStatus),
    ReadHoldingRegisters(RegisterData),
    ReadInputRegisters(RegisterData),
    WriteSingleCoil(WriteSingleCoil),
    WriteSingleRegister(WriteSingleRegister),
    WriteMultipleCoils(WriteAck),
    WriteMultipleRegisters(WriteAck),
}

impl Response {
    /// The echo a device sends for a write request. Reads carry device data
    /// and have no echo, so they yield `None`.
    pub fn from_request(request: &Request) -> Option<Self> {
        match request {
            Request::WriteSingleCoil(body) => Some(Self::WriteSingleCoil(*body)),
            Request::WriteSingleRegister(body) => Some(Self::WriteSingleRegister(*body)),
            Request::WriteMultipleCoils(body) => Some(Self::WriteMultipleCoils(WriteAck {
                start_address: body.start_address(),
                quantity: body.quantity(),
            })),
            Request::WriteMultipleRegisters(body) => Some(Self::WriteMultipleRegisters(WriteAck {
                start_address: body.start_address(),
                quantity: body.quantity(),
            })),
            Request::ReadCoils(_)
            | Request::ReadDiscreteInputs(_)
            | Request::ReadHoldingRegisters(_)
            | Request::ReadInputRegisters(_) => None,
        }
    }

    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadCoils(_) => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
        }
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_u8(self.function_code().as_u8())?;
        match self {
            Self::ReadCoils(status) | Self::ReadDiscreteInputs(status) => status.encode_body(w),
            Self::ReadHoldingRegisters(data) | Self::ReadInputRegisters(data) => {
                data.encode_body(w)
            }
            Self::WriteSingleCoil(body) => body.encode_body(w),
            Self::WriteSingleRegister(body) => body.encode_body(w),
            Self::WriteMultipleCoils(ack) | Self::WriteMultipleRegisters(ack) => {
                ack.encode_body(w)
            }
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new(MAX_PDU_LEN);
        self.encode(&mut w)?;
        Ok(w.into_vec())
    }

    /// Parse a response PDU of any supported function. Exception PDUs are
    /// rejected with `InvalidFunctionCode`; probe them with
    /// [`ExceptionResponse::decode_expected`](crate::pdu::ExceptionResponse::decode_expected).
    pub fn decode(pdu: &[u8]) -> Result<Self, DecodeError> {
        let function = FunctionCode::from_u8(Reader::new(pdu).peek_u8()?)?;
        Self::decode_expected(pdu, function)?.ok_or(DecodeError::InvalidFunctionCode)
    }

    /// Parse a response PDU for a request of function `expected`.
    ///
    /// Returns `Ok(None)` when the first byte is anything else, including the
    /// exception form of `expected`.
    pub fn decode_expected(pdu: &[u8], expected: FunctionCode) -> Result<Option<Self>, DecodeError> {
        let mut r = Reader::new(pdu);
        if r.read_u8()? != expected.as_u8() {
            return Ok(None);
        }
        let response = match expected {
            FunctionCode::ReadCoils => Self::ReadCoils(BitStatus::decode_body(&mut r)?),
            FunctionCode::ReadDiscreteInputs => {
                Self::ReadDiscreteInputs(BitStatus::decode_body(&mut r)?)
            }
            FunctionCode::ReadHoldingRegisters => {
                Self::ReadHoldingRegisters(RegisterData::decode_body(&mut r)?)
            }
            FunctionCode::ReadInputRegisters => {
                Self::ReadInputRegisters(RegisterData::decode_body(&mut r)?)
            }
            FunctionCode::WriteSingleCoil => {
                Self::WriteSingleCoil(WriteSingleCoil::decode_body(&mut r)?)
            }
            FunctionCode::WriteSingleRegister => {
                Self::WriteSingleRegister(WriteSingleRegister::decode_body(&mut r)?)
            }
            FunctionCode::WriteMultipleCoils => Self::WriteMultipleCoils(WriteAck::decode_body(
                &mut r,
                MAX_WRITE_COILS,
            )?),
            FunctionCode::WriteMultipleRegisters => Self::WriteMultipleRegisters(
                WriteAck::decode_body(&mut r, MAX_WRITE_REGISTERS)?,
            ),
        };
        r.finish()?;
        Ok(Some(response))
    }
}
