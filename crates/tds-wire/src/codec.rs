//! UTF-16LE string helpers shared by the encoders and the token reader.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Number of UTF-16 code units `s` encodes to.
#[must_use]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Write a UTF-16LE string without length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for c in s.encode_utf16() {
        dst.put_u16_le(c);
    }
}

/// Encode a string as UTF-16LE into a new vector.
#[must_use]
pub fn utf16_bytes(s: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(s.len() * 2);
    write_utf16_string(&mut buf, s);
    buf
}

/// Read `units` UTF-16LE code units and decode them.
pub fn read_utf16_string(src: &mut impl Buf, units: usize) -> Result<String, ProtocolError> {
    let byte_count = units * 2;
    if src.remaining() < byte_count {
        return Err(ProtocolError::IncompletePacket {
            expected: byte_count,
            actual: src.remaining(),
        });
    }

    let code_units: Vec<u16> = (0..units).map(|_| src.get_u16_le()).collect();
    String::from_utf16(&code_units).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Read a B_VARCHAR: 1-byte length in code units, then UTF-16LE text.
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::UnexpectedEof);
    }
    let len = src.get_u8() as usize;
    read_utf16_string(src, len)
}

/// Read a US_VARCHAR: 2-byte length in code units, then UTF-16LE text.
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    if src.remaining() < 2 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let len = src.get_u16_le() as usize;
    read_utf16_string(src, len)
}

/// Skip exactly `len` bytes, failing if fewer remain.
pub(crate) fn skip(src: &mut impl Buf, len: usize) -> Result<(), ProtocolError> {
    if src.remaining() < len {
        return Err(ProtocolError::IncompletePacket {
            expected: len,
            actual: src.remaining(),
        });
    }
    src.advance(len);
    Ok(())
}

/// Fail with [`ProtocolError::UnexpectedEof`] unless `len` bytes remain.
pub(crate) fn require(src: &impl Buf, len: usize) -> Result<(), ProtocolError> {
    if src.remaining() < len {
        return Err(ProtocolError::UnexpectedEof);
    }
    Ok(())
}

/// Split off the body of a token with a 2-byte length prefix.
///
/// Fields are decoded from the returned body, so trailing fields a newer
/// server appends are skipped with it.
pub(crate) fn token_body(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    require(src, 2)?;
    let length = usize::from(src.get_u16_le());
    if src.remaining() < length {
        return Err(ProtocolError::IncompletePacket {
            expected: length,
            actual: src.remaining(),
        });
    }
    Ok(src.copy_to_bytes(length))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_len_counts_code_units() {
        assert_eq!(utf16_len("Hello"), 5);
        assert_eq!(utf16_len("世界"), 2);
        // U+1F600 is a surrogate pair
        assert_eq!(utf16_len("\u{1F600}"), 2);
    }

    #[test]
    fn test_b_varchar_read() {
        let mut buf = vec![3u8];
        buf.extend(utf16_bytes("abc"));
        let mut cursor = &buf[..];
        assert_eq!(read_b_varchar(&mut cursor).unwrap(), "abc");
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_us_varchar_read() {
        let text = "Test string with Unicode: αβγ";
        let mut buf = (utf16_len(text) as u16).to_le_bytes().to_vec();
        buf.extend(utf16_bytes(text));
        let mut cursor = &buf[..];
        assert_eq!(read_us_varchar(&mut cursor).unwrap(), text);
    }

    #[test]
    fn test_truncated_string() {
        let buf = [4u8, b'a', 0];
        let mut cursor = &buf[..];
        assert_eq!(
            read_b_varchar(&mut cursor),
            Err(ProtocolError::IncompletePacket {
                expected: 8,
                actual: 2
            })
        );
    }

    #[test]
    fn test_lone_surrogate_rejected() {
        let buf = [0x00, 0xD8];
        let mut cursor = &buf[..];
        assert!(matches!(
            read_utf16_string(&mut cursor, 1),
            Err(ProtocolError::StringEncoding(_))
        ));
    }
}
