use core::fmt;

/// Rejections raised while building a request body, before any byte is
/// produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValidationError {
    InvalidStartAddress,
    InvalidQuantity,
    InvalidArraySize,
    InvalidBufferSize,
    InvalidCoilsInput,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStartAddress => f.write_str("invalid start address"),
            Self::InvalidQuantity => f.write_str("invalid quantity"),
            Self::InvalidArraySize => f.write_str("invalid array size"),
            Self::InvalidBufferSize => f.write_str("invalid buffer size"),
            Self::InvalidCoilsInput => f.write_str("invalid coils input"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ValidationError {}

/// Errors that can occur while writing encoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EncodeError {
    BufferTooSmall,
    ValueOutOfRange,
    Validation(ValidationError),
}

impl From<ValidationError> for EncodeError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => f.write_str("buffer too small"),
            Self::ValueOutOfRange => f.write_str("value out of range"),
            Self::Validation(err) => write!(f, "validation failed: {err}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

/// Errors that can occur while parsing received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecodeError {
    UnexpectedEof,
    InvalidFunctionCode,
    InvalidLength,
    InvalidValue,
    InvalidProtocolId,
    TrailingBytes,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => f.write_str("unexpected end of input"),
            Self::InvalidFunctionCode => f.write_str("invalid function code"),
            Self::InvalidLength => f.write_str("invalid length"),
            Self::InvalidValue => f.write_str("invalid value"),
            Self::InvalidProtocolId => f.write_str("invalid protocol id"),
            Self::TrailingBytes => f.write_str("trailing bytes after body"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}
