//! Coil bit packing: bit `i` lives in bit `i % 8` of byte `i / 8`, LSB first.

use alloc::vec::Vec;

/// Number of bytes needed to carry `quantity` packed bits.
pub const fn packed_len(quantity: usize) -> usize {
    quantity.div_ceil(8)
}

pub fn pack(values: &[bool]) -> Vec<u8> {
    let mut out = alloc::vec![0u8; packed_len(values.len())];
    for (i, _) in values.iter().enumerate().filter(|(_, on)| **on) {
        out[i / 8] |= 1u8 << (i % 8);
    }
    out
}

/// Expand the first `quantity` bits of `packed`.
///
/// Bits past the end of the buffer are dropped, so the result may be shorter
/// than `quantity` when the buffer is undersized.
pub fn unpack(packed: &[u8], quantity: usize) -> Vec<bool> {
    (0..quantity).map_while(|i| bit(packed, i)).collect()
}

/// Zero every bit at or above `quantity` in the last used byte.
pub fn clear_unused(packed: &mut [u8], quantity: usize) {
    let tail = quantity % 8;
    if tail == 0 {
        return;
    }
    if let Some(last) = packed.get_mut(quantity / 8) {
        *last &= (1u8 << tail) - 1;
    }
}

pub fn bit(packed: &[u8], index: usize) -> Option<bool> {
    let byte = packed.get(index / 8)?;
    Some(byte & (1u8 << (index % 8)) != 0)
}

#[cfg(test)]
mod tests {
    use super::{bit, clear_unused, pack, packed_len, unpack};

    #[test]
    fn packs_lsb_first() {
        let values = [true, false, true, true, false, false, true, false, true];
        assert_eq!(pack(&values), [0b0100_1101, 0b0000_0001]);
    }

    #[test]
    fn clear_unused_masks_only_the_tail() {
        let mut packed = [0xFF, 0xFF];
        clear_unused(&mut packed, 11);
        assert_eq!(packed, [0xFF, 0b0000_0111]);

        let mut whole = [0xFF];
        clear_unused(&mut whole, 8);
        assert_eq!(whole, [0xFF]);
    }

    #[test]
    fn unpack_stops_at_quantity() {
        let bits = unpack(&[0xFF, 0x01], 10);
        assert_eq!(bits.len(), 10);
        assert!(bits[8]);
        assert!(!bits[9]);
        assert_eq!(bit(&[0x01], 8), None);
    }

    #[test]
    fn packed_len_rounds_up() {
        assert_eq!(packed_len(0), 0);
        assert_eq!(packed_len(1), 1);
        assert_eq!(packed_len(8), 1);
        assert_eq!(packed_len(1968), 246);
    }
}
