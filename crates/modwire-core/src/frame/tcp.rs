use crate::encoding::{Reader, Writer};
use crate::frame::Framing;
use crate::{DecodeError, EncodeError};
use alloc::vec::Vec;

pub const MBAP_HEADER_LEN: usize = 7;
/// Largest legal value of the MBAP length field (unit id + PDU).
pub const MAX_MBAP_LENGTH: u16 = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Length includes unit-id byte + PDU length.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_be_u16(self.transaction_id)?;
        w.write_be_u16(self.protocol_id)?;
        w.write_be_u16(self.length)?;
        w.write_u8(self.unit_id)
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let transaction_id = r.read_be_u16()?;
        let protocol_id = r.read_be_u16()?;
        let length = r.read_be_u16()?;
        let unit_id = r.read_u8()?;

        if protocol_id != 0 {
            return Err(DecodeError::InvalidProtocolId);
        }
        if length == 0 || length > MAX_MBAP_LENGTH {
            return Err(DecodeError::InvalidLength);
        }

        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
        })
    }

    pub fn pdu_len(&self) -> usize {
        usize::from(self.length) - 1
    }
}

pub fn encode_frame(
    w: &mut Writer,
    transaction_id: u16,
    unit_id: u8,
    pdu: &[u8],
) -> Result<(), EncodeError> {
    let length = u16::try_from(pdu.len() + 1).map_err(|_| EncodeError::ValueOutOfRange)?;
    if length > MAX_MBAP_LENGTH {
        return Err(EncodeError::ValueOutOfRange);
    }

    let header = MbapHeader {
        transaction_id,
        protocol_id: 0,
        length,
        unit_id,
    };
    header.encode(w)?;
    w.write_all(pdu)
}

/// One reassembled MBAP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: Vec<u8>,
}

/// Modbus TCP (MBAP) framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFraming;

impl Framing for TcpFraming {
    fn encode(&self, transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new(MBAP_HEADER_LEN + usize::from(MAX_MBAP_LENGTH) - 1);
        encode_frame(&mut w, transaction_id, unit_id, pdu)?;
        Ok(w.into_vec())
    }

    fn split(&self, buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
        if buf.len() < MBAP_HEADER_LEN {
            return Ok(None);
        }
        let mut r = Reader::new(buf);
        let header = MbapHeader::decode(&mut r)?;
        let total = MBAP_HEADER_LEN + header.pdu_len();
        if buf.len() < total {
            return Ok(None);
        }
        let frame = Frame {
            transaction_id: header.transaction_id,
            unit_id: header.unit_id,
            pdu: r.take(header.pdu_len())?.to_vec(),
        };
        Ok(Some((frame, total)))
    }
}

/// Accumulates stream chunks and hands out complete frames in arrival order.
///
/// Chunks may split a frame anywhere or carry several frames at once.
#[derive(Debug, Default)]
pub struct FrameBuffer<F = TcpFraming> {
    framing: F,
    buf: Vec<u8>,
}

impl FrameBuffer<TcpFraming> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<F: Framing> FrameBuffer<F> {
    pub fn with_framing(framing: F) -> Self {
        Self {
            framing,
            buf: Vec::new(),
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes received but not yet part of an emitted frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame. A malformed header poisons the stream,
    /// so the buffer is dropped along with the error.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        match self.framing.split(&self.buf) {
            Ok(Some((frame, consumed))) => {
                self.buf.drain(..consumed);
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.buf.clear();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameBuffer, MbapHeader, TcpFraming, encode_frame};
    use crate::DecodeError;
    use crate::encoding::{Reader, Writer};
    use crate::frame::Framing;

    #[test]
    fn mbap_header_roundtrip() {
        let mut w = Writer::new(32);
        encode_frame(&mut w, 1, 2, &[0x03, 0x00, 0x6B, 0x00, 0x03]).unwrap();
        assert_eq!(
            w.as_bytes(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );

        let mut r = Reader::new(w.as_bytes());
        assert_eq!(
            MbapHeader::decode(&mut r).unwrap(),
            MbapHeader {
                transaction_id: 1,
                protocol_id: 0,
                length: 6,
                unit_id: 2,
            }
        );
    }

    #[test]
    fn rejects_non_zero_protocol_id() {
        let mut buf = FrameBuffer::new();
        buf.extend(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x02, 0x01, 0x03]);
        assert_eq!(buf.next_frame().unwrap_err(), DecodeError::InvalidProtocolId);
        assert_eq!(buf.buffered(), 0);
    }

    #[test]
    fn rejects_out_of_range_length() {
        let mut buf = FrameBuffer::new();
        buf.extend(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(buf.next_frame().unwrap_err(), DecodeError::InvalidLength);

        buf.extend(&[0x00, 0x01, 0x00, 0x00, 0x00, 0xFE, 0x01]);
        assert_eq!(buf.next_frame().unwrap_err(), DecodeError::InvalidLength);
    }

    #[test]
    fn waits_for_the_whole_frame() {
        let frame = TcpFraming.encode(7, 1, &[0x03, 0x02, 0x00, 0x2A]).unwrap();
        let mut buf = FrameBuffer::new();
        buf.extend(&frame[..5]);
        assert_eq!(buf.next_frame().unwrap(), None);
        buf.extend(&frame[5..9]);
        assert_eq!(buf.next_frame().unwrap(), None);
        buf.extend(&frame[9..]);
        let out = buf.next_frame().unwrap().unwrap();
        assert_eq!(out.transaction_id, 7);
        assert_eq!(out.unit_id, 1);
        assert_eq!(out.pdu, [0x03, 0x02, 0x00, 0x2A]);
        assert_eq!(buf.buffered(), 0);
    }

    #[test]
    fn several_frames_in_one_chunk() {
        let mut chunk = TcpFraming.encode(1, 1, &[0x06, 0x00, 0x01, 0x00, 0x03]).unwrap();
        chunk.extend(TcpFraming.encode(2, 1, &[0x83, 0x02]).unwrap());
        chunk.extend(&[0x00, 0x03, 0x00]);

        let mut buf = FrameBuffer::new();
        buf.extend(&chunk);
        assert_eq!(buf.next_frame().unwrap().unwrap().transaction_id, 1);
        assert_eq!(buf.next_frame().unwrap().unwrap().pdu, [0x83, 0x02]);
        assert_eq!(buf.next_frame().unwrap(), None);
        assert_eq!(buf.buffered(), 3);
    }

    #[test]
    fn encode_refuses_oversized_pdu() {
        assert!(TcpFraming.encode(1, 1, &[0u8; 253]).is_err());
        assert!(TcpFraming.encode(1, 1, &[0u8; 252]).is_ok());
    }
}
