use crate::DecodeError;

const EXCEPTION_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub const ALL: [Self; 8] = [
        Self::ReadCoils,
        Self::ReadDiscreteInputs,
        Self::ReadHoldingRegisters,
        Self::ReadInputRegisters,
        Self::WriteSingleCoil,
        Self::WriteSingleRegister,
        Self::WriteMultipleCoils,
        Self::WriteMultipleRegisters,
    ];

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        Self::ALL
            .into_iter()
            .find(|fc| fc.as_u8() == value)
            .ok_or(DecodeError::InvalidFunctionCode)
    }

    pub const fn is_exception(value: u8) -> bool {
        (value & EXCEPTION_BIT) != 0
    }

    /// The byte a server answers with when it rejects this function.
    pub const fn exception_byte(self) -> u8 {
        self.as_u8() | EXCEPTION_BIT
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "ReadCoils",
            Self::ReadDiscreteInputs => "ReadDiscreteInputs",
            Self::ReadHoldingRegisters => "ReadHoldingRegisters",
            Self::ReadInputRegisters => "ReadInputRegisters",
            Self::WriteSingleCoil => "WriteSingleCoil",
            Self::WriteSingleRegister => "WriteSingleRegister",
            Self::WriteMultipleCoils => "WriteMultipleCoils",
            Self::WriteMultipleRegisters => "WriteMultipleRegisters",
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value)
    }
}

#[cfg(test)]
mod tests {
    use super::FunctionCode;
    use crate::DecodeError;

    #[test]
    fn codes_roundtrip_through_bytes() {
        for fc in FunctionCode::ALL {
            assert_eq!(FunctionCode::from_u8(fc.as_u8()).unwrap(), fc);
        }
        assert_eq!(FunctionCode::WriteMultipleCoils.as_u8(), 0x0F);
    }

    #[test]
    fn rejects_unsupported_and_exception_bytes() {
        assert_eq!(FunctionCode::from_u8(0x16).unwrap_err(), DecodeError::InvalidFunctionCode);
        assert_eq!(FunctionCode::from_u8(0x83).unwrap_err(), DecodeError::InvalidFunctionCode);
        assert_eq!(FunctionCode::ReadHoldingRegisters.exception_byte(), 0x83);
        assert!(FunctionCode::is_exception(0x83));
    }
}
