//! Byte codecs for characteristic values.
//! Fixed-width integers and floats in both byte orders, hex and UTF-8.

use crate::core::bluetooth::{BleError, BleResult};

/// Decodes a hex string into bytes. Accepts upper and lower case digits.
pub fn hex_to_bytes(s: &str) -> BleResult<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(BleError::InvalidEncoding(format!(
            "hex string has odd length {}",
            s.len()
        )));
    }
    hex::decode(s).map_err(|e| BleError::InvalidEncoding(e.to_string()))
}

/// Lower-case hex, no separators.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn string_to_bytes(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

/// Malformed UTF-8 is rejected rather than replaced.
pub fn bytes_to_string(bytes: &[u8]) -> BleResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| BleError::InvalidEncoding(e.to_string()))
}

fn take<const N: usize>(buf: &[u8], offset: usize) -> BleResult<[u8; N]> {
    let end = offset.checked_add(N).ok_or(BleError::BufferTooShort {
        needed: usize::MAX,
        actual: buf.len(),
    })?;
    let slice = buf.get(offset..end).ok_or(BleError::BufferTooShort {
        needed: end,
        actual: buf.len(),
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

macro_rules! fixed_width_codec {
    ($ty:ty, $n:literal, $dec_le:ident, $dec_be:ident, $dec_le_at:ident, $dec_be_at:ident, $enc_le:ident, $enc_be:ident) => {
        pub fn $dec_le(buf: &[u8]) -> BleResult<$ty> {
            $dec_le_at(buf, 0)
        }

        pub fn $dec_be(buf: &[u8]) -> BleResult<$ty> {
            $dec_be_at(buf, 0)
        }

        pub fn $dec_le_at(buf: &[u8], offset: usize) -> BleResult<$ty> {
            Ok(<$ty>::from_le_bytes(take::<$n>(buf, offset)?))
        }

        pub fn $dec_be_at(buf: &[u8], offset: usize) -> BleResult<$ty> {
            Ok(<$ty>::from_be_bytes(take::<$n>(buf, offset)?))
        }

        pub fn $enc_le(value: $ty) -> [u8; $n] {
            value.to_le_bytes()
        }

        pub fn $enc_be(value: $ty) -> [u8; $n] {
            value.to_be_bytes()
        }
    };
}

fixed_width_codec!(u16, 2, read_u16_le, read_u16_be, read_u16_le_at, read_u16_be_at, write_u16_le, write_u16_be);
fixed_width_codec!(i16, 2, read_i16_le, read_i16_be, read_i16_le_at, read_i16_be_at, write_i16_le, write_i16_be);
fixed_width_codec!(u32, 4, read_u32_le, read_u32_be, read_u32_le_at, read_u32_be_at, write_u32_le, write_u32_be);
fixed_width_codec!(i32, 4, read_i32_le, read_i32_be, read_i32_le_at, read_i32_be_at, write_i32_le, write_i32_be);
fixed_width_codec!(f32, 4, read_f32_le, read_f32_be, read_f32_le_at, read_f32_be_at, write_f32_le, write_f32_be);
fixed_width_codec!(f64, 8, read_f64_le, read_f64_be, read_f64_le_at, read_f64_be_at, write_f64_le, write_f64_be);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hex_rejects_odd_length_and_bad_digits() {
        assert!(matches!(hex_to_bytes("abc"), Err(BleError::InvalidEncoding(_))));
        assert!(matches!(hex_to_bytes("zz"), Err(BleError::InvalidEncoding(_))));
        assert_eq!(hex_to_bytes("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn hex_is_lower_case_without_separators() {
        assert_eq!(bytes_to_hex(&[0x0A, 0xFF, 0x00]), "0aff00");
        assert_eq!(hex_to_bytes("0AfF").unwrap(), vec![0x0A, 0xFF]);
    }

    #[test]
    fn signed_decode_is_twos_complement() {
        assert_eq!(read_i16_le(&[0xFF, 0xFF]).unwrap(), -1);
        assert_eq!(read_i16_be(&[0x80, 0x00]).unwrap(), i16::MIN);
        assert_eq!(read_i32_le(&[0xFE, 0xFF, 0xFF, 0xFF]).unwrap(), -2);
        assert_eq!(read_u16_le(&[0x34, 0x12]).unwrap(), 0x1234);
        assert_eq!(read_u16_be(&[0x12, 0x34]).unwrap(), 0x1234);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert_eq!(
            read_u32_le(&[1, 2, 3]),
            Err(BleError::BufferTooShort { needed: 4, actual: 3 })
        );
        assert!(matches!(read_f64_be(&[0; 7]), Err(BleError::BufferTooShort { .. })));
        assert!(matches!(read_u16_le_at(&[0; 4], 3), Err(BleError::BufferTooShort { .. })));
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        assert_eq!(read_u16_le(&[0x01, 0x00, 0xFF, 0xFF]).unwrap(), 1);
        assert_eq!(read_u16_le_at(&[0xFF, 0x01, 0x00], 1).unwrap(), 1);
    }

    #[test]
    fn utf8_decode_fails_on_malformed_input() {
        assert_eq!(bytes_to_string(&string_to_bytes("héllo")).unwrap(), "héllo");
        assert!(matches!(bytes_to_string(&[0xC3, 0x28]), Err(BleError::InvalidEncoding(_))));
    }

    proptest! {
        #[test]
        fn hex_round_trips(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let encoded = bytes_to_hex(&bytes);
            prop_assert_eq!(encoded.len(), bytes.len() * 2);
            prop_assert_eq!(hex_to_bytes(&encoded).unwrap(), bytes);
        }

        #[test]
        fn integers_round_trip(a in any::<u16>(), b in any::<i16>(), c in any::<u32>(), d in any::<i32>()) {
            prop_assert_eq!(read_u16_le(&write_u16_le(a)).unwrap(), a);
            prop_assert_eq!(read_u16_be(&write_u16_be(a)).unwrap(), a);
            prop_assert_eq!(read_i16_le(&write_i16_le(b)).unwrap(), b);
            prop_assert_eq!(read_i16_be(&write_i16_be(b)).unwrap(), b);
            prop_assert_eq!(read_u32_le(&write_u32_le(c)).unwrap(), c);
            prop_assert_eq!(read_u32_be(&write_u32_be(c)).unwrap(), c);
            prop_assert_eq!(read_i32_le(&write_i32_le(d)).unwrap(), d);
            prop_assert_eq!(read_i32_be(&write_i32_be(d)).unwrap(), d);
        }

        #[test]
        fn floats_round_trip_bitwise(x in any::<f32>(), y in any::<f64>()) {
            prop_assert_eq!(read_f32_le(&write_f32_le(x)).unwrap().to_bits(), x.to_bits());
            prop_assert_eq!(read_f32_be(&write_f32_be(x)).unwrap().to_bits(), x.to_bits());
            prop_assert_eq!(read_f64_le(&write_f64_le(y)).unwrap().to_bits(), y.to_bits());
            prop_assert_eq!(read_f64_be(&write_f64_be(y)).unwrap().to_bits(), y.to_bits());
        }
    }
}
