//! Length-prefixed field primitives shared by the message and trie-node
//! codecs. Every read is cap-checked against the field's protocol limit
//! before any allocation, so a hostile declared length can never force an
//! oversized buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Errors raised while interpreting wire-format data (framing errors).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown message tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("unknown hash algorithm tag: 0x{0:02x}")]
    UnknownHashAlgorithm(u8),

    #[error("unknown trie slot tag: 0x{0:02x}")]
    UnknownSlotTag(u8),

    #[error("truncated input while reading {field}")]
    Truncated { field: &'static str },

    #[error("{field} length {len} exceeds cap {max}")]
    FieldTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} length mismatch: expected {expected}, got {actual}")]
    FieldLengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{count} trailing bytes after decoded value")]
    TrailingBytes { count: usize },
}

/// Write a `[len: u32][bytes]` blob.
pub fn write_blob(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Read a `[len: u32][bytes]` blob, rejecting declared lengths above `max`
/// or past the end of input.
pub fn read_blob(buf: &mut impl Buf, max: usize, field: &'static str) -> Result<Bytes, WireError> {
    let len = read_u32(buf, field)? as usize;
    if len > max {
        return Err(WireError::FieldTooLarge { field, len, max });
    }
    if buf.remaining() < len {
        return Err(WireError::Truncated { field });
    }
    Ok(buf.copy_to_bytes(len))
}

/// Read exactly `out.len()` raw bytes (fixed-size field, no length prefix).
pub fn read_exact(buf: &mut impl Buf, out: &mut [u8], field: &'static str) -> Result<(), WireError> {
    if buf.remaining() < out.len() {
        return Err(WireError::Truncated { field });
    }
    buf.copy_to_slice(out);
    Ok(())
}

pub fn read_u8(buf: &mut impl Buf, field: &'static str) -> Result<u8, WireError> {
    if buf.remaining() < 1 {
        return Err(WireError::Truncated { field });
    }
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut impl Buf, field: &'static str) -> Result<u16, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::Truncated { field });
    }
    Ok(buf.get_u16())
}

pub fn read_u32(buf: &mut impl Buf, field: &'static str) -> Result<u32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated { field });
    }
    Ok(buf.get_u32())
}

pub fn read_u64(buf: &mut impl Buf, field: &'static str) -> Result<u64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::Truncated { field });
    }
    Ok(buf.get_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let mut buf = BytesMut::new();
        write_blob(&mut buf, b"hello");
        let mut read = buf.freeze();
        let blob = read_blob(&mut read, 16, "test").unwrap();
        assert_eq!(&blob[..], b"hello");
        assert!(!read.has_remaining());
    }

    #[test]
    fn blob_rejects_oversized_declared_length() {
        let mut buf = BytesMut::new();
        // declared length far beyond the cap, and beyond the actual input
        buf.put_u32(u32::MAX);
        let mut read = buf.freeze();
        let err = read_blob(&mut read, 64, "test").unwrap_err();
        assert!(matches!(err, WireError::FieldTooLarge { max: 64, .. }));
    }

    #[test]
    fn blob_rejects_truncated_body() {
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.put_slice(b"short");
        let mut read = buf.freeze();
        let err = read_blob(&mut read, 64, "test").unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn fixed_reads_check_remaining() {
        let mut read = Bytes::from_static(&[0u8; 3]);
        assert!(read_u32(&mut read, "test").is_err());
        let mut out = [0u8; 8];
        let mut read = Bytes::from_static(&[0u8; 3]);
        assert!(read_exact(&mut read, &mut out, "test").is_err());
    }
}
