/// Errors that can occur in IPC transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create a connected endpoint pair.
    #[error("failed to create endpoint pair: {0}")]
    Pair(std::io::Error),

    /// Waiting for readiness failed.
    #[error("readiness wait failed: {0}")]
    Poll(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// More endpoints were passed to a single readiness wait than the platform accepts.
    #[error("too many endpoints for one readiness wait ({count}, max {max})")]
    TooManyEndpoints { count: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, TransportError>;
