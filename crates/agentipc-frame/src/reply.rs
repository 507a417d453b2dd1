use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::status;

/// Reply header: status (3) + space (1) + length (8) + newline (1) = 13 bytes.
pub const REPLY_HEADER_SIZE: usize = 13;

/// Width of the left-justified body length field.
const LENGTH_WIDTH: usize = 8;

/// Largest body the 8-column length field can describe.
pub const MAX_REPLY_LEN: usize = 99_999_999;

/// A provider's answer to one request: a status code plus an owned body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Control-protocol status code (see [`crate::status`]).
    pub status: u16,
    /// The reply body.
    pub payload: Bytes,
}

impl Reply {
    /// Create a reply.
    pub fn new(status: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            status,
            payload: payload.into(),
        }
    }

    /// A `200 OK` reply.
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self::new(status::OK, payload)
    }

    /// True for 2xx statuses.
    pub fn is_ok(&self) -> bool {
        status::is_success(self.status)
    }

    /// The body as UTF-8 text.
    pub fn text(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    /// The total wire size of this reply (header + body + trailing newline).
    pub fn wire_size(&self) -> usize {
        REPLY_HEADER_SIZE + self.payload.len() + 1
    }
}

/// Encode a reply into the control-protocol result format.
///
/// Wire format:
/// ```text
/// ┌──────────┬─────┬──────────────────┬──────┬───────────────┬──────┐
/// │ Status   │ ' ' │ Length           │ '\n' │ Body          │ '\n' │
/// │ (3B dec) │     │ (8B dec, padded) │      │ (Length bytes)│      │
/// └──────────┴─────┴──────────────────┴──────┴───────────────┴──────┘
/// ```
pub fn encode_reply(reply: &Reply, dst: &mut BytesMut) -> Result<()> {
    if !status::is_valid(reply.status) {
        return Err(FrameError::InvalidStatus(reply.status));
    }
    if reply.payload.len() > MAX_REPLY_LEN {
        return Err(FrameError::PayloadTooLarge {
            size: reply.payload.len(),
            max: MAX_REPLY_LEN,
        });
    }

    let header = format!(
        "{:03} {:<width$}\n",
        reply.status,
        reply.payload.len(),
        width = LENGTH_WIDTH
    );
    debug_assert_eq!(header.len(), REPLY_HEADER_SIZE);

    dst.reserve(reply.wire_size());
    dst.put_slice(header.as_bytes());
    dst.put_slice(&reply.payload);
    dst.put_u8(b'\n');
    Ok(())
}

/// Decode a reply from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete reply yet.
/// On success, consumes the reply bytes from the buffer.
pub fn decode_reply(src: &mut BytesMut, max_payload: usize) -> Result<Option<Reply>> {
    if src.len() < REPLY_HEADER_SIZE {
        return Ok(None);
    }

    let (status, body_len) = parse_reply_header(&src[..REPLY_HEADER_SIZE])?;
    if body_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_payload,
        });
    }

    let total = REPLY_HEADER_SIZE + body_len + 1;
    if src.len() < total {
        return Ok(None);
    }
    if src[total - 1] != b'\n' {
        return Err(FrameError::MalformedReply(
            "missing newline after body".to_string(),
        ));
    }

    src.advance(REPLY_HEADER_SIZE);
    let payload = src.split_to(body_len).freeze();
    src.advance(1);

    Ok(Some(Reply { status, payload }))
}

fn parse_reply_header(header: &[u8]) -> Result<(u16, usize)> {
    let status_digits = &header[..3];
    if !status_digits.iter().all(u8::is_ascii_digit) {
        return Err(malformed_header(header));
    }
    let status = status_digits
        .iter()
        .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'));
    if !status::is_valid(status) {
        return Err(malformed_header(header));
    }

    if header[3] != b' ' || header[REPLY_HEADER_SIZE - 1] != b'\n' {
        return Err(malformed_header(header));
    }

    // Left-justified: digits first, then space padding up to the newline.
    let length_field = &header[4..4 + LENGTH_WIDTH];
    let digit_count = length_field
        .iter()
        .take_while(|byte| byte.is_ascii_digit())
        .count();
    if digit_count == 0 || length_field[digit_count..].iter().any(|byte| *byte != b' ') {
        return Err(malformed_header(header));
    }
    let body_len = length_field[..digit_count]
        .iter()
        .fold(0usize, |acc, digit| acc * 10 + usize::from(digit - b'0'));

    Ok((status, body_len))
}

fn malformed_header(header: &[u8]) -> FrameError {
    FrameError::MalformedReply(format!(
        "bad header {:?}",
        String::from_utf8_lossy(header)
    ))
}
