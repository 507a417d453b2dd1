use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agentipc_frame::{FrameConfig, FrameError, Reply, ReplyReader, RequestWriter, MAX_REPLY_LEN};
use agentipc_transport::IpcStream;
use tracing::{debug, trace, warn};

use crate::affinity::{ConnectionId, ThreadAffinity};
use crate::channel::ChannelConfig;
use crate::error::{ChannelError, Result};

/// Consumer end of one registered connection.
///
/// Obtained from [`ProviderRegistry::register`](crate::ProviderRegistry::register).
/// Each call to [`send`](Consumer::send) writes one request and blocks until
/// the provider's reply arrives or the request timeout elapses.
///
/// The first thread that sends becomes the connection's owner; sends from
/// any other thread fail with [`ChannelError::ThreadAffinity`] before a byte
/// is written.
pub struct Consumer {
    channel: String,
    id: ConnectionId,
    writer: RequestWriter<IpcStream>,
    replies: ReplyReader<IpcStream>,
    affinity: Arc<ThreadAffinity>,
    timeout: Duration,
    /// Replies still owed for requests that timed out.
    stale: usize,
    broken: Option<String>,
}

impl Consumer {
    pub(crate) fn new(
        channel: String,
        id: ConnectionId,
        stream: IpcStream,
        affinity: Arc<ThreadAffinity>,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let read_half = stream.try_clone()?;
        let writer = RequestWriter::with_config_ipc(
            stream,
            FrameConfig {
                max_payload_size: config.max_request_size,
                read_timeout: None,
                write_timeout: Some(config.request_timeout),
            },
        )?;
        let replies = ReplyReader::with_config(
            read_half,
            FrameConfig {
                max_payload_size: MAX_REPLY_LEN,
                ..FrameConfig::default()
            },
        );

        Ok(Self {
            channel,
            id,
            writer,
            replies,
            affinity,
            timeout: config.request_timeout,
            stale: 0,
            broken: None,
        })
    }

    /// Name of the provider this connection talks to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Identity of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// How long each send waits for its reply.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the reply timeout for subsequent sends.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// True once the connection can no longer be used.
    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    /// Send one request and wait for its reply.
    ///
    /// A [`ChannelError::Timeout`] while waiting for the reply leaves the
    /// connection usable: the late reply is discarded before the next request
    /// goes out. Disconnects, undecodable replies and a request write that
    /// times out leave it broken, and every later send fails with
    /// [`ChannelError::Disconnected`].
    pub fn send(&mut self, payload: &[u8]) -> Result<Reply> {
        if let Some(reason) = &self.broken {
            return Err(ChannelError::Disconnected {
                channel: self.channel.clone(),
                reason: reason.clone(),
            });
        }

        self.affinity
            .check(self.id)
            .map_err(|violation| ChannelError::ThreadAffinity {
                channel: self.channel.clone(),
                connection: violation.connection,
                owner: violation.owner,
                caller: violation.caller,
            })?;

        while self.stale > 0 {
            let late = self
                .replies
                .read_reply_timeout(self.timeout)
                .map_err(|err| self.reply_error(err))?;
            self.stale -= 1;
            debug!(
                channel = %self.channel,
                connection = %self.id,
                status = late.status,
                "discarded late reply"
            );
        }

        self.writer.send(payload).map_err(|err| self.request_error(err))?;
        trace!(
            channel = %self.channel,
            connection = %self.id,
            size = payload.len(),
            "sent request"
        );

        let reply = self
            .replies
            .read_reply_timeout(self.timeout)
            .map_err(|err| {
                if matches!(err, FrameError::Timeout) {
                    self.stale += 1;
                }
                self.reply_error(err)
            })?;
        trace!(
            channel = %self.channel,
            connection = %self.id,
            status = reply.status,
            size = reply.payload.len(),
            "received reply"
        );
        Ok(reply)
    }

    /// Send a text command.
    pub fn send_text(&mut self, command: &str) -> Result<Reply> {
        self.send(command.as_bytes())
    }

    /// Format a command and send it.
    ///
    /// ```ignore
    /// consumer.run(format_args!("ban req.url ~ {}", pattern))?;
    /// ```
    pub fn run(&mut self, args: fmt::Arguments<'_>) -> Result<Reply> {
        match args.as_str() {
            Some(command) => self.send_text(command),
            None => self.send_text(&args.to_string()),
        }
    }

    fn request_error(&mut self, err: FrameError) -> ChannelError {
        match err {
            // Rejected before anything was written.
            FrameError::PayloadTooLarge { .. } | FrameError::InvalidLength(_) => {
                ChannelError::Frame(err)
            }
            // Part of the request may be on the wire; the stream can't be resynchronized.
            FrameError::Timeout => self.disconnected(format!(
                "request write timed out after {:?}",
                self.timeout
            )),
            other => self.disconnected(other.to_string()),
        }
    }

    fn reply_error(&mut self, err: FrameError) -> ChannelError {
        match err {
            FrameError::Timeout => ChannelError::Timeout {
                channel: self.channel.clone(),
                timeout: self.timeout,
            },
            FrameError::MalformedReply(_)
            | FrameError::InvalidStatus(_)
            | FrameError::PayloadTooLarge { .. }
            | FrameError::Allocation { .. } => {
                let reason = err.to_string();
                self.mark_broken(reason.clone());
                ChannelError::MalformedResponse {
                    channel: self.channel.clone(),
                    reason,
                }
            }
            other => self.disconnected(other.to_string()),
        }
    }

    fn disconnected(&mut self, reason: String) -> ChannelError {
        self.mark_broken(reason.clone());
        ChannelError::Disconnected {
            channel: self.channel.clone(),
            reason,
        }
    }

    fn mark_broken(&mut self, reason: String) {
        warn!(
            channel = %self.channel,
            connection = %self.id,
            reason = %reason,
            "consumer connection unusable"
        );
        self.broken = Some(reason);
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.affinity.release(self.id);
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("stale", &self.stale)
            .field("broken", &self.broken)
            .finish()
    }
}
