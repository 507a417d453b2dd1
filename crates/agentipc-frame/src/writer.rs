use std::io::{ErrorKind, Write};

use agentipc_transport::IpcStream;
use bytes::BytesMut;
use tracing::trace;

use crate::codec::{encode_request, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::reader::{is_timeout, transport_to_frame_error};
use crate::reply::{encode_reply, Reply};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete requests to any `Write` stream (consumer side).
pub struct RequestWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> RequestWriter<T> {
    /// Create a new request writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new request writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send one request.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        self.buf.reserve(HEADER_SIZE + payload.len());
        encode_request(payload, &mut self.buf)?;
        write_all(&mut self.inner, &self.buf)?;
        flush(&mut self.inner)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl RequestWriter<IpcStream> {
    /// Create a request writer for `IpcStream` and apply write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

/// Serialize a reply onto `conn` (provider side).
pub fn write_reply<W: Write>(conn: &mut W, reply: &Reply) -> Result<()> {
    let mut buf = BytesMut::with_capacity(reply.wire_size());
    encode_reply(reply, &mut buf)?;
    trace!(status = reply.status, size = reply.payload.len(), "writing reply");
    write_all(conn, &buf)?;
    flush(conn)
}

fn write_all<W: Write>(conn: &mut W, data: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < data.len() {
        match conn.write(&data[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if is_timeout(&err) => return Err(FrameError::Timeout),
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

fn flush<W: Write>(conn: &mut W) -> Result<()> {
    loop {
        match conn.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if is_timeout(&err) => return Err(FrameError::Timeout),
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::reader::{ReplyReader, RequestReader};
    use crate::status;

    #[test]
    fn write_single_request() {
        let mut writer = RequestWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"ban req.url ~ /").unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(wire, b"000000015 ban req.url ~ /");
    }

    #[test]
    fn payload_too_large_rejected() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = RequestWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.send(b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(writer.get_ref().get_ref().is_empty());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = RequestWriter::new(sink);

        writer.send(b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let mut writer = RequestWriter::new(InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        });
        writer.send(b"retry").unwrap();

        assert_eq!(writer.into_inner().data, b"000000005 retry");
    }

    #[test]
    fn would_block_write_is_a_timeout() {
        let mut writer = RequestWriter::new(WouldBlockWriter);
        assert!(matches!(writer.send(b"x").unwrap_err(), FrameError::Timeout));
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = RequestWriter::new(ZeroWriter);
        let err = writer.send(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn request_and_reply_over_pair() {
        let (provider, consumer) = IpcStream::pair().unwrap();
        let consumer_reader = consumer.try_clone().unwrap();
        let mut writer = RequestWriter::new(consumer);
        let mut replies = ReplyReader::new(consumer_reader);
        let mut requests = RequestReader::new(provider.try_clone().unwrap());
        let mut provider = provider;

        writer.send(b"ping").unwrap();
        let request = requests.read_request().unwrap();
        assert_eq!(request.as_bytes(), b"ping");

        let answer = request.text().unwrap().to_uppercase();
        write_reply(&mut provider, &Reply::ok(answer)).unwrap();

        let reply = replies.read_reply().unwrap();
        assert_eq!(reply.status, status::OK);
        assert_eq!(reply.text().unwrap(), "PING");
    }

    #[test]
    fn write_reply_rejects_invalid_status() {
        let mut out = Cursor::new(Vec::<u8>::new());
        let err = write_reply(&mut out, &Reply::new(1000, "x")).unwrap_err();
        assert!(matches!(err, FrameError::InvalidStatus(1000)));
        assert!(out.into_inner().is_empty());
    }

    #[test]
    fn applies_write_timeout_for_ipc_stream() {
        let (_provider, consumer) = IpcStream::pair().unwrap();
        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };
        let writer = RequestWriter::with_config_ipc(consumer, cfg);
        assert!(writer.is_ok());
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct WouldBlockWriter;

    impl Write for WouldBlockWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
