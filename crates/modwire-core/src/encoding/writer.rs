use crate::EncodeError;
use alloc::vec::Vec;

/// Growable output buffer with a hard length ceiling.
///
/// The ceiling mirrors the protocol frame limits so an oversized body is
/// reported as [`EncodeError::BufferTooSmall`] instead of reaching the wire.
#[derive(Debug, Clone)]
pub struct Writer {
    buf: Vec<u8>,
    limit: usize,
}

impl Writer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit.min(260)),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    fn reserve(&self, extra: usize) -> Result<(), EncodeError> {
        match self.buf.len().checked_add(extra) {
            Some(total) if total <= self.limit => Ok(()),
            _ => Err(EncodeError::BufferTooSmall),
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.reserve(1)?;
        self.buf.push(value);
        Ok(())
    }

    pub fn write_be_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.write_all(&value.to_be_bytes())
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        self.reserve(data.len())?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn write_be_words(&mut self, words: &[u16]) -> Result<(), EncodeError> {
        self.reserve(words.len() * 2)?;
        for word in words {
            self.buf.extend_from_slice(&word.to_be_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Writer;
    use crate::EncodeError;

    #[test]
    fn writes_within_limit() {
        let mut w = Writer::new(5);
        w.write_u8(0x10).unwrap();
        w.write_be_words(&[0x0102, 0x0304]).unwrap();
        assert_eq!(w.as_bytes(), &[0x10, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(w.write_u8(0).unwrap_err(), EncodeError::BufferTooSmall);
        assert_eq!(w.len(), 5);
    }

    #[test]
    fn oversized_slice_is_rejected_whole() {
        let mut w = Writer::new(2);
        assert_eq!(w.write_all(&[1, 2, 3]).unwrap_err(), EncodeError::BufferTooSmall);
        assert!(w.is_empty());
    }
}
