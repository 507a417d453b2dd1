use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use agentipc_transport::IpcStream;
use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::codec::{decode_header, FrameConfig, Request, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::reply::{decode_reply, Reply};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Read exactly `length` bytes from `conn`.
///
/// A read that returns no data before `length` bytes have arrived is reported
/// as [`FrameError::Truncated`]; it never spins. The buffer is reserved
/// fallibly, so an absurd length yields [`FrameError::Allocation`] instead of
/// aborting the process.
pub fn read_exact<R: Read>(conn: &mut R, length: usize) -> Result<Bytes> {
    let mut data = Vec::new();
    data.try_reserve_exact(length)
        .map_err(|_| FrameError::Allocation { size: length })?;
    data.resize(length, 0);

    let received = fill(conn, &mut data)?;
    if received < length {
        return Err(FrameError::Truncated {
            expected: length,
            received,
        });
    }
    Ok(Bytes::from(data))
}

/// Fill `buf` from `conn`, returning how many bytes arrived before end-of-stream.
fn fill<R: Read>(conn: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match conn.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if is_timeout(&err) => return Err(FrameError::Timeout),
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(filled)
}

pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Reads complete requests from any `Read` stream (provider side).
pub struct RequestReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Read> RequestReader<T> {
    /// Create a new request reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new request reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next complete request (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the stream ends cleanly
    /// between requests, and `Err(FrameError::Truncated)` when it ends inside one.
    pub fn read_request(&mut self) -> Result<Request> {
        let mut header = [0u8; HEADER_SIZE];
        match fill(&mut self.inner, &mut header)? {
            0 => return Err(FrameError::ConnectionClosed),
            HEADER_SIZE => {}
            received => {
                return Err(FrameError::Truncated {
                    expected: HEADER_SIZE,
                    received,
                })
            }
        }

        let length = decode_header(&header)?;
        trace!(length, "decoded request header");
        if length > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: length,
                max: self.config.max_payload_size,
            });
        }

        let payload = read_exact(&mut self.inner, length)?;
        Ok(Request::new(payload))
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl RequestReader<IpcStream> {
    /// Create a request reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

/// Reads complete replies from any `Read` stream (consumer side).
///
/// Handles partial reads internally; callers always get complete replies.
pub struct ReplyReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> ReplyReader<T> {
    /// Create a new reply reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new reply reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete reply (blocking).
    pub fn read_reply(&mut self) -> Result<Reply> {
        self.read_reply_with(|_| Ok(()))
    }

    fn read_reply_with(&mut self, mut before_read: impl FnMut(&T) -> Result<()>) -> Result<Reply> {
        loop {
            if let Some(reply) = decode_reply(&mut self.buf, self.config.max_payload_size)? {
                return Ok(reply);
            }

            before_read(&self.inner)?;

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) => return Err(FrameError::Timeout),
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Bytes received but not yet decoded into a reply.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl ReplyReader<IpcStream> {
    /// Read the next reply, failing with [`FrameError::Timeout`] once `timeout`
    /// has elapsed in total, however the bytes trickle in.
    pub fn read_reply_timeout(&mut self, timeout: Duration) -> Result<Reply> {
        let deadline = Instant::now() + timeout;
        self.read_reply_with(|stream| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FrameError::Timeout);
            }
            stream
                .set_read_timeout(Some(remaining))
                .map_err(transport_to_frame_error)
        })
    }
}

pub(crate) fn transport_to_frame_error(err: agentipc_transport::TransportError) -> FrameError {
    match err {
        agentipc_transport::TransportError::Io(io)
        | agentipc_transport::TransportError::Pair(io)
        | agentipc_transport::TransportError::Poll(io) => FrameError::Io(io),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;
    use crate::codec::encode_request;
    use crate::reply::encode_reply;
    use crate::status;

    fn wire_request(payload: &[u8]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        encode_request(payload, &mut wire).unwrap();
        wire.to_vec()
    }

    #[test]
    fn read_single_request() {
        let mut reader = RequestReader::new(Cursor::new(wire_request(b"ping")));
        let request = reader.read_request().unwrap();
        assert_eq!(request.as_bytes(), b"ping");
    }

    #[test]
    fn read_back_to_back_requests() {
        let mut wire = wire_request(b"one");
        wire.extend(wire_request(b""));
        wire.extend(wire_request(b"three"));

        let mut reader = RequestReader::new(Cursor::new(wire));
        assert_eq!(reader.read_request().unwrap().as_bytes(), b"one");
        assert!(reader.read_request().unwrap().is_empty());
        assert_eq!(reader.read_request().unwrap().as_bytes(), b"three");
        assert!(matches!(
            reader.read_request().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire_request(b"slow"),
            pos: 0,
        };
        let mut reader = RequestReader::new(byte_reader);
        assert_eq!(reader.read_request().unwrap().as_bytes(), b"slow");
    }

    #[test]
    fn declared_length_longer_than_stream_is_truncated() {
        let mut wire = b"000000016 ".to_vec();
        wire.extend_from_slice(b"only-part");

        let mut reader = RequestReader::new(Cursor::new(wire));
        let err = reader.read_request().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 16,
                received: 9
            }
        ));
    }

    #[test]
    fn closed_mid_header_is_truncated() {
        let mut reader = RequestReader::new(Cursor::new(b"0000".to_vec()));
        let err = reader.read_request().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: HEADER_SIZE,
                received: 4
            }
        ));
    }

    #[test]
    fn invalid_header_in_stream() {
        let mut reader = RequestReader::new(Cursor::new(b"00000004x ping".to_vec()));
        let err = reader.read_request().unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength(_)));
    }

    #[test]
    fn oversized_request_rejected_before_allocation() {
        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = RequestReader::with_config(Cursor::new(b"000001024 ".to_vec()), cfg);
        let err = reader.read_request().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 1024, max: 16 }));
    }

    #[test]
    fn read_exact_does_not_spin_on_eof() {
        let mut conn = Cursor::new(b"abc".to_vec());
        let err = read_exact(&mut conn, 10).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 10,
                received: 3
            }
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            bytes: wire_request(b"ok"),
            pos: 0,
        };
        let mut framed = RequestReader::new(reader);
        assert_eq!(framed.read_request().unwrap().as_bytes(), b"ok");
    }

    #[test]
    fn would_block_is_a_timeout() {
        let reader = WouldBlockReader;
        let mut framed = RequestReader::new(reader);
        assert!(matches!(framed.read_request().unwrap_err(), FrameError::Timeout));
    }

    #[test]
    fn reply_reader_reassembles_partial_replies() {
        let mut wire = BytesMut::new();
        encode_reply(&Reply::ok("PING"), &mut wire).unwrap();
        encode_reply(&Reply::new(status::UNKNOWN, "nope"), &mut wire).unwrap();

        let mut reader = ReplyReader::new(ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        });
        let first = reader.read_reply().unwrap();
        assert_eq!((first.status, first.payload.as_ref()), (200, b"PING".as_ref()));
        let second = reader.read_reply().unwrap();
        assert_eq!(second.status, status::UNKNOWN);
        assert!(matches!(
            reader.read_reply().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn reply_timeout_over_ipc_stream() {
        let (provider, consumer) = IpcStream::pair().unwrap();
        let mut reader = ReplyReader::new(consumer);

        let started = Instant::now();
        let err = reader
            .read_reply_timeout(Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, FrameError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(40));
        drop(provider);
    }

    #[test]
    fn reply_over_ipc_stream() {
        let (mut provider, consumer) = IpcStream::pair().unwrap();
        let mut wire = BytesMut::new();
        encode_reply(&Reply::ok("hello"), &mut wire).unwrap();
        provider.write_all(&wire).unwrap();

        let mut reader = ReplyReader::new(consumer);
        let reply = reader.read_reply_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(reply.text().unwrap(), "hello");
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn applies_read_timeout_for_ipc_stream() {
        let (provider, _consumer) = IpcStream::pair().unwrap();
        let cfg = FrameConfig {
            read_timeout: Some(Duration::from_millis(10)),
            ..FrameConfig::default()
        };
        let mut reader = RequestReader::with_config_ipc(provider, cfg).unwrap();
        assert!(matches!(reader.read_request().unwrap_err(), FrameError::Timeout));
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct WouldBlockReader;

    impl Read for WouldBlockReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }
    }
}
