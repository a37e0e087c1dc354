use crate::encoding::{Reader, Writer};
use crate::pdu::FunctionCode;
use crate::{DecodeError, EncodeError};
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Unknown(u8),
}

impl ExceptionCode {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerDeviceBusy,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetFailedToRespond,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::ServerDeviceBusy => 0x06,
            Self::MemoryParityError => 0x08,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetFailedToRespond => 0x0B,
            Self::Unknown(raw) => raw,
        }
    }
}

/// Negative reply from the far end: `[fc | 0x80][code]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub code: ExceptionCode,
}

impl ExceptionResponse {
    pub const ENCODED_LEN: usize = 2;

    pub fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_u8(self.function.exception_byte())?;
        w.write_u8(self.code.as_u8())
    }

    /// Parse an exception PDU raised against `expected`.
    ///
    /// Returns `Ok(None)` when the PDU is not an exception for that function.
    pub fn decode_expected(
        pdu: &[u8],
        expected: FunctionCode,
    ) -> Result<Option<Self>, DecodeError> {
        let mut r = Reader::new(pdu);
        if r.read_u8()? != expected.exception_byte() {
            return Ok(None);
        }
        let code = ExceptionCode::from_u8(r.read_u8()?);
        r.finish()?;
        Ok(Some(Self {
            function: expected,
            code,
        }))
    }
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rejected with exception 0x{:02X} ({:?})",
            self.function.name(),
            self.code.as_u8(),
            self.code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{ExceptionCode, ExceptionResponse};
    use crate::encoding::Writer;
    use crate::pdu::FunctionCode;

    #[test]
    fn encodes_with_exception_bit() {
        let resp = ExceptionResponse {
            function: FunctionCode::ReadHoldingRegisters,
            code: ExceptionCode::ServerDeviceBusy,
        };
        let mut w = Writer::new(ExceptionResponse::ENCODED_LEN);
        resp.encode(&mut w).unwrap();
        assert_eq!(w.as_bytes(), &[0x83, 0x06]);
        assert_eq!(
            ExceptionResponse::decode_expected(w.as_bytes(), FunctionCode::ReadHoldingRegisters)
                .unwrap(),
            Some(resp)
        );
    }

    #[test]
    fn other_functions_are_not_matched() {
        let decoded =
            ExceptionResponse::decode_expected(&[0x81, 0x02], FunctionCode::ReadHoldingRegisters)
                .unwrap();
        assert_eq!(decoded, None);

        let unknown = ExceptionResponse::decode_expected(&[0x85, 0x19], FunctionCode::WriteSingleCoil)
            .unwrap()
            .unwrap();
        assert_eq!(unknown.code, ExceptionCode::Unknown(0x19));
    }
}
