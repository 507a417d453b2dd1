use std::fmt;
use std::io;

use agentipc_channel::ChannelError;
use agentipc_frame::FrameError;
use agentipc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::Timeout => CliError::new(TIMEOUT, format!("{context}: {err}")),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Transport(err) => transport_error(context, err),
        ChannelError::Frame(err) => frame_error(context, err),
        ChannelError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ChannelError::CapacityExceeded { .. }
        | ChannelError::InvalidName(_)
        | ChannelError::MissingStart { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        ChannelError::MalformedResponse { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ChannelError::Disconnected { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeouts_map_to_124() {
        let err = channel_error(
            "request failed",
            ChannelError::Timeout {
                channel: "echo".to_string(),
                timeout: Duration::from_millis(50),
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("request failed: "));
    }

    #[test]
    fn capacity_is_a_usage_error() {
        let err = channel_error(
            "register failed",
            ChannelError::CapacityExceeded {
                channel: "echo".to_string(),
                capacity: 2,
            },
        );
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn nested_io_errors_keep_their_kind() {
        let err = channel_error(
            "send failed",
            ChannelError::Frame(FrameError::Io(io::Error::from(io::ErrorKind::BrokenPipe))),
        );
        assert_eq!(err.code, FAILURE);

        let err = channel_error(
            "start failed",
            ChannelError::Transport(TransportError::Pair(io::Error::from(
                io::ErrorKind::Other,
            ))),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
