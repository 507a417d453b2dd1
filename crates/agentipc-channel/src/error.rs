use std::thread::ThreadId;
use std::time::Duration;

use crate::affinity::ConnectionId;

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] agentipc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] agentipc_frame::FrameError),

    /// No provider is registered under this name.
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// Provider names must be non-empty and free of whitespace and NUL bytes.
    #[error("invalid provider name {0:?}")]
    InvalidName(String),

    /// A provider with this name already exists.
    #[error("provider '{0}' is already registered")]
    DuplicateProvider(String),

    /// Registering another connection would exceed the channel's listener capacity.
    #[error("channel '{channel}' is full ({capacity} listeners)")]
    CapacityExceeded { channel: String, capacity: usize },

    /// The channel's dispatch loop is running; its listener set is frozen.
    #[error("channel '{0}' is already dispatching; register consumers before start")]
    RegistrationClosed(String),

    /// The channel's dispatch loop was already started.
    #[error("channel '{0}' is already started")]
    AlreadyStarted(String),

    /// Start was requested for a channel with no handler bound.
    #[error("channel '{0}' has no handler bound")]
    NoHandler(String),

    /// A provider binds a handler but nothing will ever start its dispatch loop.
    #[error(
        "provider '{provider}' defines an IPC handler but has no start routine; \
         set one with set_start(\"{provider}\", ProviderRegistry::start)"
    )]
    MissingStart { provider: String },

    /// A consumer connection was used from a thread other than its owner.
    #[error(
        "connection {connection} on channel '{channel}' is owned by thread {owner:?}, \
         used from {caller:?}"
    )]
    ThreadAffinity {
        channel: String,
        connection: ConnectionId,
        owner: ThreadId,
        caller: ThreadId,
    },

    /// The provider did not answer within the request timeout.
    #[error("request on channel '{channel}' timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },

    /// The connection to the provider is closed or unusable.
    #[error("channel '{channel}' disconnected: {reason}")]
    Disconnected { channel: String, reason: String },

    /// The provider's reply could not be decoded.
    #[error("malformed response on channel '{channel}': {reason}")]
    MalformedResponse { channel: String, reason: String },

    /// The dispatch thread panicked.
    #[error("dispatch loop for channel '{0}' panicked")]
    DispatchPanicked(String),
}

impl ChannelError {
    /// True if retrying the same request on the same connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
