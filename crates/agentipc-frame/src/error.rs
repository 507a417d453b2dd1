/// Errors that can occur during request/reply encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The 10th header byte is not the `' '` separator.
    #[error("invalid request separator 0x{0:02x} (expected 0x20)")]
    InvalidSeparator(u8),

    /// The length field is not 9 ASCII decimal digits.
    #[error("invalid request length field {0:?}")]
    InvalidLength(String),

    /// The payload exceeds the protocol limit or the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The peer stopped sending before the declared number of bytes arrived.
    #[error("truncated message (expected {expected} bytes, got {received})")]
    Truncated { expected: usize, received: usize },

    /// The connection was closed at a message boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// A blocking read or write exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// A message buffer could not be allocated.
    #[error("failed to allocate {size} byte message buffer")]
    Allocation { size: usize },

    /// The reply does not follow the status/length/body format.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The reply status does not fit the three-digit status field.
    #[error("invalid reply status {0} (expected 100..=999)")]
    InvalidStatus(u16),

    /// An I/O error occurred while reading or writing.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True for errors that mean the peer is gone rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            FrameError::ConnectionClosed | FrameError::Truncated { .. } => true,
            FrameError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
