//! Variable-length unsigned integers
//!
//! 7 payload bits per byte, low-order group first. Every byte except the
//! last has its high bit set.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// A u64 never needs more than 10 groups of 7 bits
pub const MAX_VARINT_LEN: usize = 10;

const CONTINUATION: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7F;

/// Varint decoding errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarintError {
    #[error("Incomplete varint")]
    Incomplete,

    #[error("Varint overflows 64 bits")]
    Overflow,
}

/// Append `value` to `buf`
pub fn encode(mut value: u64, buf: &mut BytesMut) {
    loop {
        let group = (value & PAYLOAD_MASK as u64) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(group);
            return;
        }
        buf.put_u8(group | CONTINUATION);
    }
}

/// Number of bytes `encode` would emit for `value`
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode a varint from the head of `buf`.
///
/// Returns the value and the number of bytes it occupied. Never looks past
/// the end of `buf`; a missing terminating byte is `Incomplete`.
pub fn decode(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut value = 0u64;

    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(VarintError::Overflow);
        }

        let group = (byte & PAYLOAD_MASK) as u64;
        let shift = 7 * i as u32;
        // The tenth group may only carry the top bit of a u64, and must end
        if i == MAX_VARINT_LEN - 1 && (group > 1 || byte & CONTINUATION != 0) {
            return Err(VarintError::Overflow);
        }
        value |= group << shift;

        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(VarintError::Incomplete)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode(value, &mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_single_byte_values() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(1), vec![0x01]);
        assert_eq!(encoded(127), vec![0x7F]);
    }

    #[test]
    fn test_multi_byte_values() {
        assert_eq!(encoded(128), vec![0x80, 0x01]);
        assert_eq!(encoded(300), vec![0xAC, 0x02]);
        assert_eq!(encoded(16_384), vec![0x80, 0x80, 0x01]);
    }

    #[test]
    fn test_encoded_len_matches_encode() {
        for value in [0, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            assert_eq!(encoded_len(value), encoded(value).len(), "value {}", value);
        }
        assert_eq!(encoded_len(u64::MAX), MAX_VARINT_LEN);
    }

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let (value, used) = decode(&[0xAC, 0x02, 0xFF, 0xFF]).unwrap();
        assert_eq!(value, 300);
        assert_eq!(used, 2);
    }

    #[test]
    fn test_decode_extremes() {
        assert_eq!(decode(&encoded(u64::MAX)).unwrap(), (u64::MAX, MAX_VARINT_LEN));
        assert_eq!(decode(&[0x00]).unwrap(), (0, 1));
    }

    #[test]
    fn test_truncated_input_is_incomplete() {
        assert_eq!(decode(&[]), Err(VarintError::Incomplete));
        assert_eq!(decode(&[0x80]), Err(VarintError::Incomplete));
        assert_eq!(decode(&[0xFF, 0xFF, 0xFF]), Err(VarintError::Incomplete));
    }

    #[test]
    fn test_overlong_input_overflows() {
        let too_long = [0xFFu8; 11];
        assert_eq!(decode(&too_long), Err(VarintError::Overflow));

        let mut too_big = vec![0xFFu8; 9];
        too_big.push(0x02);
        assert_eq!(decode(&too_big), Err(VarintError::Overflow));
    }

    #[test]
    fn test_continuation_on_tenth_byte_overflows() {
        // More bytes could never make these valid
        let mut top_bit = vec![0xFFu8; 9];
        top_bit.push(0x81);
        assert_eq!(decode(&top_bit), Err(VarintError::Overflow));

        let mut zero_group = vec![0x80u8; 9];
        zero_group.push(0x80);
        assert_eq!(decode(&zero_group), Err(VarintError::Overflow));

        // Nine continuation bytes may still be completed
        assert_eq!(decode(&[0xFFu8; 9]), Err(VarintError::Incomplete));
    }
}
