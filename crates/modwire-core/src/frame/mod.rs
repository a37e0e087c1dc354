//! Framing of PDUs on a byte stream.

pub mod tcp;

use crate::{DecodeError, EncodeError};
use alloc::vec::Vec;

pub use tcp::{
    Frame, FrameBuffer, MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MbapHeader, TcpFraming, encode_frame,
};

/// How PDUs are wrapped and delimited on a stream transport.
///
/// Only MBAP framing ships today; serial framings slot in behind the same
/// interface.
pub trait Framing {
    /// Wrap `pdu` into one frame ready to be written.
    fn encode(&self, transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Result<Vec<u8>, EncodeError>;

    /// Look for one complete frame at the front of `buf`.
    ///
    /// Returns the frame and the number of bytes it occupied, or `None` when
    /// more input is needed.
    fn split(&self, buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError>;
}
