//! Variable-length integer encoding utilities.
//!
//! Every integer stored in a posting chunk goes through this codec: 7 data
//! bits per byte, least significant group first, with the high bit set on
//! every byte except the last. Zero still takes exactly one byte.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{QuiverError, Result};

/// Longest encoding of a `u32`.
pub const MAX_VARINT32_LEN: usize = 5;

/// Longest encoding of a `u64`.
pub const MAX_VARINT64_LEN: usize = 10;

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len_u64(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len_u32(value: u32) -> usize {
    encoded_len_u64(value as u64)
}

/// Encode a u32 into `buf`, returning the number of bytes written.
///
/// `buf` must hold at least [`MAX_VARINT32_LEN`] bytes or the encoded length
/// of `value`, whichever is smaller.
pub fn encode_u32_into(value: u32, buf: &mut [u8]) -> usize {
    encode_u64_into(value as u64, buf)
}

/// Encode a u64 into `buf`, returning the number of bytes written.
pub fn encode_u64_into(value: u64, buf: &mut [u8]) -> usize {
    let mut val = value;
    let mut i = 0;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80; // Set continuation bit
        }

        buf[i] = byte;
        i += 1;

        if val == 0 {
            return i;
        }
    }
}

/// Encode a u32 value using variable-length encoding.
pub fn encode_u32(value: u32) -> Vec<u8> {
    let mut bytes = [0u8; MAX_VARINT32_LEN];
    let len = encode_u32_into(value, &mut bytes);
    bytes[..len].to_vec()
}

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = [0u8; MAX_VARINT64_LEN];
    let len = encode_u64_into(value, &mut bytes);
    bytes[..len].to_vec()
}

/// Decode a u32 value, returning it with the number of bytes consumed.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let mut result = 0u32;
    let mut shift = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift == 28 && byte & 0x70 != 0 {
            return Err(QuiverError::corruption("VarInt overflows u32"));
        }

        result |= ((byte & 0x7F) as u32) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, i + 1));
        }

        shift += 7;
        if shift > 28 {
            return Err(QuiverError::corruption("VarInt overflows u32"));
        }
    }

    Err(QuiverError::corruption("Incomplete VarInt"))
}

/// Decode a u64 value, returning it with the number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift == 63 && byte & 0x7E != 0 {
            return Err(QuiverError::corruption("VarInt overflows u64"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, i + 1));
        }

        shift += 7;
        if shift > 63 {
            return Err(QuiverError::corruption("VarInt overflows u64"));
        }
    }

    Err(QuiverError::corruption("Incomplete VarInt"))
}

/// Write a variable-length encoded u32 to a writer.
pub fn write_u32<W: Write + ?Sized>(writer: &mut W, value: u32) -> Result<usize> {
    let mut bytes = [0u8; MAX_VARINT32_LEN];
    let len = encode_u32_into(value, &mut bytes);
    writer.write_all(&bytes[..len])?;
    Ok(len)
}

/// Write a variable-length encoded u64 to a writer.
pub fn write_u64<W: Write + ?Sized>(writer: &mut W, value: u64) -> Result<usize> {
    let mut bytes = [0u8; MAX_VARINT64_LEN];
    let len = encode_u64_into(value, &mut bytes);
    writer.write_all(&bytes[..len])?;
    Ok(len)
}

/// Read a variable-length encoded u32, returning it with the bytes consumed.
pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> Result<(u32, usize)> {
    let mut buf = [0u8; MAX_VARINT32_LEN];
    for i in 0..MAX_VARINT32_LEN {
        buf[i] = reader.read_u8()?;
        if buf[i] & 0x80 == 0 {
            return decode_u32(&buf[..=i]);
        }
    }
    Err(QuiverError::corruption("VarInt overflows u32"))
}

/// Read a variable-length encoded u64, returning it with the bytes consumed.
pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> Result<(u64, usize)> {
    let mut buf = [0u8; MAX_VARINT64_LEN];
    for i in 0..MAX_VARINT64_LEN {
        buf[i] = reader.read_u8()?;
        if buf[i] & 0x80 == 0 {
            return decode_u64(&buf[..=i]);
        }
    }
    Err(QuiverError::corruption("VarInt overflows u64"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_decode_u32() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, (1 << 31) - 1, u32::MAX];

        for &value in &test_values {
            let encoded = encode_u32(value);
            let (decoded, bytes_read) = decode_u32(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
            assert_eq!(encoded.len(), encoded_len_u32(value));
        }
    }

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 16384, (1u64 << 63) - 1, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
            assert_eq!(encoded.len(), encoded_len_u64(value));
        }
    }

    #[test]
    fn test_minimum_byte_counts() {
        assert_eq!(encode_u32(0), vec![0x00]);
        assert_eq!(encode_u32(127), vec![0x7F]);
        assert_eq!(encode_u32(128), vec![0x80, 0x01]);
        assert_eq!(encode_u32((1 << 31) - 1).len(), 5);
        assert_eq!(encode_u64((1 << 63) - 1).len(), 9);
        assert_eq!(encode_u64(u64::MAX).len(), MAX_VARINT64_LEN);
    }

    #[test]
    fn test_decode_stops_at_terminal_byte() {
        let bytes = [0x80, 0x01, 0x05, 0xFF];
        let (value, used) = decode_u32(&bytes).unwrap();
        assert_eq!(value, 128);
        assert_eq!(used, 2);
    }

    #[test]
    fn test_write_read_stream() {
        let mut buffer = Vec::new();
        let written = write_u32(&mut buffer, 12345).unwrap() + write_u64(&mut buffer, 1 << 40).unwrap();
        assert_eq!(written, buffer.len());

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_u32(&mut cursor).unwrap(), (12345, 2));
        assert_eq!(read_u64(&mut cursor).unwrap().0, 1 << 40);
    }

    #[test]
    fn test_incomplete_varint() {
        let incomplete = vec![0x80];
        assert!(decode_u32(&incomplete).is_err());
        assert!(decode_u64(&incomplete).is_err());
        assert!(read_u32(&mut Cursor::new(incomplete)).is_err());
    }

    #[test]
    fn test_overflow() {
        let overflow_data = vec![0xFF; 10];
        assert!(matches!(
            decode_u32(&overflow_data),
            Err(QuiverError::Corruption(_))
        ));
        assert!(decode_u32(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]).is_err());
        assert!(decode_u64(&[0xFF; 11]).is_err());
    }
}
