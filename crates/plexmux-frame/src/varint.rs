//! Unsigned LEB128 varints, as used for mplex headers and lengths.

use bytes::BufMut;

use crate::error::{ProtocolError, Result};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Append `value` to `dst`.
pub fn encode<B: BufMut>(mut value: u64, dst: &mut B) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Number of bytes [`encode`] writes for `value`.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode a varint from the front of `src` without consuming it.
///
/// Returns `Ok(None)` if `src` ends before the varint does, otherwise the
/// value and the number of bytes it occupied.
pub fn decode(src: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (i, &byte) in src.iter().enumerate() {
        if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
            return Err(ProtocolError::InvalidVarint);
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encoded(value: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode(value, &mut buf);
        buf.to_vec()
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encoded(0), [0x00]);
        assert_eq!(encoded(1), [0x01]);
        assert_eq!(encoded(127), [0x7f]);
        assert_eq!(encoded(128), [0x80, 0x01]);
        assert_eq!(encoded(300), [0xac, 0x02]);
        assert_eq!(encoded(16_384), [0x80, 0x80, 0x01]);
    }

    #[test]
    fn max_value_uses_ten_bytes() {
        let bytes = encoded(u64::MAX);
        assert_eq!(bytes.len(), MAX_VARINT_LEN);
        assert_eq!(bytes[9], 0x01);
        assert_eq!(decode(&bytes).unwrap(), Some((u64::MAX, MAX_VARINT_LEN)));
    }

    #[test]
    fn encoded_len_matches_encode() {
        for value in [0, 1, 127, 128, 16_383, 16_384, 1 << 35, u64::MAX >> 3, u64::MAX] {
            assert_eq!(encoded_len(value), encoded(value).len(), "value {value}");
        }
    }

    #[test]
    fn incomplete_input_needs_more() {
        assert_eq!(decode(&[]).unwrap(), None);
        assert_eq!(decode(&[0x80]).unwrap(), None);
        assert_eq!(decode(&[0xff, 0xff]).unwrap(), None);
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        assert_eq!(decode(&[0xac, 0x02, 0x99]).unwrap(), Some((300, 2)));
    }

    #[test]
    fn overlong_varint_rejected() {
        let bytes = [0xff; 11];
        assert!(matches!(decode(&bytes), Err(ProtocolError::InvalidVarint)));

        let mut too_big = vec![0xff; 9];
        too_big.push(0x02);
        assert!(matches!(decode(&too_big), Err(ProtocolError::InvalidVarint)));
    }
}
