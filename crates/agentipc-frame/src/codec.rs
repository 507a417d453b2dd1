use std::str::Utf8Error;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Request header: 9 length digits + 1 separator = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// Width of the decimal length field.
pub const LENGTH_DIGITS: usize = 9;

/// Byte that terminates the length field.
pub const SEPARATOR: u8 = b' ';

/// Largest payload the 9-digit length field can describe.
pub const MAX_REQUEST_LEN: usize = 999_999_999;

/// Default maximum payload size accepted by readers and writers: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A decoded request payload.
///
/// The payload is opaque bytes; [`Request::text`] gives a checked UTF-8 view
/// for handlers that speak textual commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    payload: Bytes,
}

impl Request {
    /// Wrap a payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The raw payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as UTF-8 text.
    pub fn text(&self) -> std::result::Result<&str, Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Take ownership of the payload.
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }

    /// The total wire size of this request (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode the 10-byte header for a payload of `len` bytes.
pub fn encode_header(len: usize) -> Result<[u8; HEADER_SIZE]> {
    if len > MAX_REQUEST_LEN {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: MAX_REQUEST_LEN,
        });
    }

    let mut header = [b'0'; HEADER_SIZE];
    header[LENGTH_DIGITS] = SEPARATOR;
    let mut remaining = len;
    for digit in header[..LENGTH_DIGITS].iter_mut().rev() {
        *digit = b'0' + (remaining % 10) as u8;
        remaining /= 10;
    }
    Ok(header)
}

/// Encode a request into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬─────────┬──────────────────┐
/// │ Length (9B ASCII)    │ Sep (1B)│ Payload          │
/// │ "000000004"          │ ' '     │ (Length bytes)   │
/// └──────────────────────┴─────────┴──────────────────┘
/// ```
pub fn encode_request(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = encode_header(payload.len())?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&header);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a request header into the declared payload length.
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<usize> {
    let separator = header[LENGTH_DIGITS];
    if separator != SEPARATOR {
        return Err(FrameError::InvalidSeparator(separator));
    }

    let digits = &header[..LENGTH_DIGITS];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::InvalidLength(
            String::from_utf8_lossy(digits).into_owned(),
        ));
    }

    Ok(digits
        .iter()
        .fold(0usize, |acc, digit| acc * 10 + usize::from(digit - b'0')))
}

/// Configuration for request readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_of(buf: &[u8]) -> [u8; HEADER_SIZE] {
        buf[..HEADER_SIZE].try_into().unwrap()
    }

    #[test]
    fn encodes_zero_padded_length() {
        let mut buf = BytesMut::new();
        encode_request(b"ping", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"000000004 ping");
    }

    #[test]
    fn header_length_matches_payload() {
        for payload in [&b""[..], &b"x"[..], &b"status"[..], &[0u8; 4096][..]] {
            let mut buf = BytesMut::new();
            encode_request(payload, &mut buf).unwrap();
            assert_eq!(decode_header(&header_of(&buf)).unwrap(), payload.len());
            assert_eq!(&buf[HEADER_SIZE..], payload);
        }
    }

    #[test]
    fn header_covers_the_full_length_range() {
        for len in [0, 9, 10, 123_456, 100_000_000, MAX_REQUEST_LEN] {
            let header = encode_header(len).unwrap();
            assert_eq!(decode_header(&header).unwrap(), len);
        }
    }

    #[test]
    fn rejects_length_beyond_nine_digits() {
        let err = encode_header(MAX_REQUEST_LEN + 1).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn rejects_bad_separator() {
        let err = decode_header(b"000000004\n").unwrap_err();
        assert!(matches!(err, FrameError::InvalidSeparator(b'\n')));
    }

    #[test]
    fn rejects_non_decimal_length() {
        for header in [b"00000000a ", b"-00000004 ", b"   000004 ", b"+00000004 "] {
            let err = decode_header(header).unwrap_err();
            assert!(matches!(err, FrameError::InvalidLength(_)), "{header:?}");
        }
    }

    #[test]
    fn request_text_view() {
        let request = Request::new(&b"vcl.list"[..]);
        assert_eq!(request.text().unwrap(), "vcl.list");
        assert_eq!(request.wire_size(), HEADER_SIZE + 8);

        let binary = Request::new(vec![0xffu8, 0xfe]);
        assert!(binary.text().is_err());
        assert_eq!(binary.as_bytes(), &[0xffu8, 0xfe]);
    }
}
