use crate::bits;
use crate::encoding::{Reader, Writer};
use crate::pdu::FunctionCode;
use crate::{DecodeError, EncodeError, ValidationError};
use alloc::vec::Vec;

pub const MAX_ADDRESS: u32 = 0xFFFF;
pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_WRITE_REGISTERS: u16 = 123;
/// Largest raw coil buffer accepted from callers before the quantity check.
pub const MAX_COIL_BUFFER_LEN: usize = 0x07B0;
/// Largest PDU that fits an MBAP frame.
pub const MAX_PDU_LEN: usize = 253;

const SINGLE_COIL_ON: u16 = 0xFF00;
const SINGLE_COIL_OFF: u16 = 0x0000;

pub(crate) fn checked_address(address: u32) -> Result<u16, ValidationError> {
    u16::try_from(address).map_err(|_| ValidationError::InvalidStartAddress)
}

/// Quantity must be in `1..=max` and the addressed block must end inside the
/// 16-bit address space.
pub(crate) fn checked_span(start: u16, quantity: u16, max: u16) -> Result<(), ValidationError> {
    if quantity == 0 || quantity > max {
        return Err(ValidationError::InvalidQuantity);
    }
    if u32::from(start) + u32::from(quantity) > MAX_ADDRESS + 1 {
        return Err(ValidationError::InvalidQuantity);
    }
    Ok(())
}

pub(crate) fn decode_coil_value(raw: u16) -> Result<bool, DecodeError> {
    match raw {
        SINGLE_COIL_ON => Ok(true),
        SINGLE_COIL_OFF => Ok(false),
        _ => Err(DecodeError::InvalidValue),
    }
}

pub(crate) const fn encode_coil_value(value: bool) -> u16 {
    if value { SINGLE_COIL_ON } else { SINGLE_COIL_OFF }
}

/// Start address and quantity shared by the four read functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadRange {
    start_address: u16,
    quantity: u16,
}

impl ReadRange {
    fn new(start: u32, quantity: u16, max: u16) -> Result<Self, ValidationError> {
        let start_address = checked_address(start)?;
        checked_span(start_address, quantity, max)?;
        Ok(Self {
            start_address,
            quantity,
        })
    }

    pub const fn start_address(&self) -> u16 {
        self.start_address
    }

    pub const fn quantity(&self) -> u16 {
        self.quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteSingleCoil {
    address: u16,
    value: bool,
}

impl WriteSingleCoil {
    pub const fn address(&self) -> u16 {
        self.address
    }

    pub const fn value(&self) -> bool {
        self.value
    }

    pub(crate) fn encode_body(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_be_u16(self.address)?;
        w.write_be_u16(encode_coil_value(self.value))
    }

    pub(crate) fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let address = r.read_be_u16()?;
        let value = decode_coil_value(r.read_be_u16()?)?;
        Ok(Self { address, value })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteSingleRegister {
    address: u16,
    value: u16,
}

impl WriteSingleRegister {
    pub const fn address(&self) -> u16 {
        self.address
    }

    pub const fn value(&self) -> u16 {
        self.value
    }

    pub(crate) fn encode_body(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_be_u16(self.address)?;
        w.write_be_u16(self.value)
    }

    pub(crate) fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            address: r.read_be_u16()?,
            value: r.read_be_u16()?,
        })
    }
}

/// FC15 body. Coils are held packed exactly as they travel on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteMultipleCoils {
    start_address: u16,
    quantity: u16,
    packed: Vec<u8>,
}

impl WriteMultipleCoils {
    pub const fn start_address(&self) -> u16 {
        self.start_address
    }

    pub const fn quantity(&self) -> u16 {
        self.quantity
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    pub fn coil(&self, index: usize) -> Option<bool> {
        if index >= usize::from(self.quantity) {
            return None;
        }
        bits::bit(&self.packed, index)
    }

    pub fn values(&self) -> Vec<bool> {
        bits::unpack(&self.packed, usize::from(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteMultipleRegisters {
    start_address: u16,
    values: Vec<u16>,
}

impl WriteMultipleRegisters {
    pub const fn start_address(&self) -> u16 {
        self.start_address
    }

    /// Always fits `u16`; construction caps the length at 123 words.
    pub fn quantity(&self) -> u16 {
        self.values.len() as u16
    }

    pub fn values(&self) -> &[u16] {
        &self.values
    }
}

/// A request body, keyed by function code.
///
/// Bodies are created through the validating constructors below and are
/// immutable afterwards, so every value of this type encodes to a well-formed
/// PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Request {
    ReadCoils(ReadRange),
    ReadDiscreteInputs(ReadRange),
    ReadHoldingRegisters(ReadRange),
    ReadInputRegisters(ReadRange),
    WriteSingleCoil(WriteSingleCoil),
    WriteSingleRegister(WriteSingleRegister),
    WriteMultipleCoils(WriteMultipleCoils),
    WriteMultipleRegisters(WriteMultipleRegisters),
}

impl Request {
    pub fn read_coils(start: u32, quantity: u16) -> Result<Self, ValidationError> {
        ReadRange::new(start, quantity, MAX_READ_BITS).map(Self::ReadCoils)
    }

    pub fn read_discrete_inputs(start: u32, quantity: u16) -> Result<Self, ValidationError> {
        ReadRange::new(start, quantity, MAX_READ_BITS).map(Self::ReadDiscreteInputs)
    }

    pub fn read_holding_registers(start: u32, quantity: u16) -> Result<Self, ValidationError> {
        ReadRange::new(start, quantity, MAX_READ_REGISTERS).map(Self::ReadHoldingRegisters)
    }

    pub fn read_input_registers(start: u32, quantity: u16) -> Result<Self, ValidationError> {
        ReadRange::new(start, quantity, MAX_READ_REGISTERS).map(Self::ReadInputRegisters)
    }

    pub fn write_single_coil(address: u32, value: bool) -> Result<Self, ValidationError> {
        Ok(Self::WriteSingleCoil(WriteSingleCoil {
            address: checked_address(address)?,
            value,
        }))
    }

    pub fn write_single_register(address: u32, value: u16) -> Result<Self, ValidationError> {
        Ok(Self::WriteSingleRegister(WriteSingleRegister {
            address: checked_address(address)?,
            value,
        }))
    }

    pub fn write_multiple_coils(start: u32, values: &[bool]) -> Result<Self, ValidationError> {
        let start_address = checked_address(start)?;
        if values.is_empty() {
            return Err(ValidationError::InvalidCoilsInput);
        }
        if values.len() > usize::from(MAX_WRITE_COILS) {
            return Err(ValidationError::InvalidArraySize);
        }
        let quantity = values.len() as u16;
        checked_span(start_address, quantity, MAX_WRITE_COILS)?;
        Ok(Self::WriteMultipleCoils(WriteMultipleCoils {
            start_address,
            quantity,
            packed: bits::pack(values),
        }))
    }

    /// FC15 from an already packed buffer.
    ///
    /// Without an explicit `quantity` every bit of `packed` is written. Bytes
    /// beyond `ceil(quantity / 8)` are ignored and bits above `quantity` in
    /// the last byte are cleared.
    pub fn write_multiple_coils_packed(
        start: u32,
        packed: &[u8],
        quantity: Option<u16>,
    ) -> Result<Self, ValidationError> {
        let start_address = checked_address(start)?;
        if packed.len() > MAX_COIL_BUFFER_LEN {
            return Err(ValidationError::InvalidBufferSize);
        }
        let capacity = packed.len() * 8;
        let quantity = match quantity {
            Some(q) if usize::from(q) > capacity => {
                return Err(ValidationError::InvalidBufferSize);
            }
            Some(q) => q,
            None => u16::try_from(capacity).map_err(|_| ValidationError::InvalidBufferSize)?,
        };
        if quantity == 0 {
            return Err(ValidationError::InvalidCoilsInput);
        }
        checked_span(start_address, quantity, MAX_WRITE_COILS)?;
        let used = bits::packed_len(usize::from(quantity));
        let mut packed = packed[..used].to_vec();
        bits::clear_unused(&mut packed, usize::from(quantity));
        Ok(Self::WriteMultipleCoils(WriteMultipleCoils {
            start_address,
            quantity,
            packed,
        }))
    }

    pub fn write_multiple_registers(start: u32, values: &[u16]) -> Result<Self, ValidationError> {
        let start_address = checked_address(start)?;
        let quantity =
            u16::try_from(values.len()).map_err(|_| ValidationError::InvalidQuantity)?;
        checked_span(start_address, quantity, MAX_WRITE_REGISTERS)?;
        Ok(Self::WriteMultipleRegisters(WriteMultipleRegisters {
            start_address,
            values: values.to_vec(),
        }))
    }

    /// FC16 from raw big-endian register bytes.
    pub fn write_multiple_registers_bytes(start: u32, bytes: &[u8]) -> Result<Self, ValidationError> {
        checked_address(start)?;
        if bytes.len() % 2 != 0 {
            return Err(ValidationError::InvalidBufferSize);
        }
        let words: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Self::write_multiple_registers(start, &words)
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

    /// Starting address targeted by the request.
    pub fn address(&self) -> u16 {
        match self {
            Self::ReadCoils(range)
            | Self::ReadDiscreteInputs(range)
            | Self::ReadHoldingRegisters(range)
            | Self::ReadInputRegisters(range) => range.start_address,
            Self::WriteSingleCoil(body) => body.address,
            Self::WriteSingleRegister(body) => body.address,
            Self::WriteMultipleCoils(body) => body.start_address,
            Self::WriteMultipleRegisters(body) => body.start_address,
        }
    }

    /// Number of coils or registers touched.
    pub fn quantity(&self) -> u16 {
        match self {
            Self::ReadCoils(range)
            | Self::ReadDiscreteInputs(range)
            | Self::ReadHoldingRegisters(range)
            | Self::ReadInputRegisters(range) => range.quantity,
            Self::WriteSingleCoil(_) | Self::WriteSingleRegister(_) => 1,
            Self::WriteMultipleCoils(body) => body.quantity,
            Self::WriteMultipleRegisters(body) => body.quantity(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Self::WriteMultipleCoils(body) => 6 + body.packed.len(),
            Self::WriteMultipleRegisters(body) => 6 + body.values.len() * 2,
            _ => 5,
        }
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_u8(self.function_code().as_u8())?;
        match self {
            Self::ReadCoils(range)
            | Self::ReadDiscreteInputs(range)
            | Self::ReadHoldingRegisters(range)
            | Self::ReadInputRegisters(range) => {
                w.write_be_u16(range.start_address)?;
                w.write_be_u16(range.quantity)
            }
            Self::WriteSingleCoil(body) => body.encode_body(w),
            Self::WriteSingleRegister(body) => body.encode_body(w),
            Self::WriteMultipleCoils(body) => {
                let byte_count =
                    u8::try_from(body.packed.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
                w.write_be_u16(body.start_address)?;
                w.write_be_u16(body.quantity)?;
                w.write_u8(byte_count)?;
                w.write_all(&body.packed)
            }
            Self::WriteMultipleRegisters(body) => {
                let byte_count = u8::try_from(body.values.len() * 2)
                    .map_err(|_| EncodeError::ValueOutOfRange)?;
                w.write_be_u16(body.start_address)?;
                w.write_be_u16(body.quantity())?;
                w.write_u8(byte_count)?;
                w.write_be_words(&body.values)
            }
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new(MAX_PDU_LEN);
        self.encode(&mut w)?;
        Ok(w.into_vec())
    }

    /// Parse a request PDU of any supported function.
    pub fn decode(pdu: &[u8]) -> Result<Self, DecodeError> {
        let function = FunctionCode::from_u8(Reader::new(pdu).peek_u8()?)?;
        Self::decode_expected(pdu, function)?.ok_or(DecodeError::InvalidFunctionCode)
    }

    /// Parse a request PDU, returning `Ok(None)` when it carries a different
    /// function code than `expected`.
    pub fn decode_expected(pdu: &[u8], expected: FunctionCode) -> Result<Option<Self>, DecodeError> {
        let mut r = Reader::new(pdu);
        if r.read_u8()? != expected.as_u8() {
            return Ok(None);
        }
        let request = match expected {
            FunctionCode::ReadCoils => {
                Self::read_coils(u32::from(r.read_be_u16()?), r.read_be_u16()?)
            }
            FunctionCode::ReadDiscreteInputs => {
                Self::read_discrete_inputs(u32::from(r.read_be_u16()?), r.read_be_u16()?)
            }
            FunctionCode::ReadHoldingRegisters => {
                Self::read_holding_registers(u32::from(r.read_be_u16()?), r.read_be_u16()?)
            }
            FunctionCode::ReadInputRegisters => {
                Self::read_input_registers(u32::from(r.read_be_u16()?), r.read_be_u16()?)
            }
            FunctionCode::WriteSingleCoil => {
                Ok(Self::WriteSingleCoil(WriteSingleCoil::decode_body(&mut r)?))
            }
            FunctionCode::WriteSingleRegister => {
                Ok(Self::WriteSingleRegister(WriteSingleRegister::decode_body(&mut r)?))
            }
            FunctionCode::WriteMultipleCoils => {
                let start = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                let byte_count = usize::from(r.read_u8()?);
                if byte_count != bits::packed_len(usize::from(quantity)) {
                    return Err(DecodeError::InvalidLength);
                }
                let packed = r.take(byte_count)?;
                Self::write_multiple_coils_packed(u32::from(start), packed, Some(quantity))
            }
            FunctionCode::WriteMultipleRegisters => {
                let start = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                let byte_count = usize::from(r.read_u8()?);
                if byte_count != usize::from(quantity) * 2 {
                    return Err(DecodeError::InvalidLength);
                }
                Self::write_multiple_registers_bytes(u32::from(start), r.take(byte_count)?)
            }
        }
        .map_err(|_| DecodeError::InvalidValue)?;
        r.finish()?;
        Ok(Some(request))
    }
}
