use std::time::Duration;

use agentipc_frame::DEFAULT_MAX_PAYLOAD;
use agentipc_transport::IpcStream;
use tracing::debug;

use crate::affinity::ConnectionId;
use crate::error::{ChannelError, Result};
use crate::handler::Handler;

/// Default number of listener connections a channel accepts.
pub const DEFAULT_CAPACITY: usize = 32;

/// Default time a consumer waits for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-channel configuration, fixed when the provider is added.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Maximum number of consumer connections.
    pub capacity: usize,
    /// How long a consumer waits for each reply.
    pub request_timeout: Duration,
    /// Bound on each provider-side read once a request has started arriving.
    /// Keeps a consumer that stalls mid-request from wedging the dispatch loop.
    pub listener_read_timeout: Option<Duration>,
    /// Largest request payload the dispatch loop accepts.
    pub max_request_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            listener_read_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            max_request_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ChannelConfig {
    /// Default configuration with a different listener capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }
}

/// Provider side of one consumer connection.
#[derive(Debug)]
pub(crate) struct Listener {
    pub(crate) id: ConnectionId,
    pub(crate) stream: IpcStream,
}

/// A provider's channel: its listener endpoints and its handler.
///
/// Listeners are append-only until the dispatch loop starts, at which point
/// they move into the loop together with the handler and the channel is
/// frozen.
pub struct Channel {
    name: String,
    config: ChannelConfig,
    listeners: Vec<Listener>,
    handler: Option<Box<dyn Handler>>,
    registered: usize,
    started: bool,
}

impl Channel {
    /// Create a channel with zero listeners and no handler.
    pub fn new(name: impl Into<String>, config: ChannelConfig) -> Self {
        Self {
            name: name.into(),
            listeners: Vec::with_capacity(config.capacity),
            config,
            handler: None,
            registered: 0,
            started: false,
        }
    }

    /// Channel name (the provider's name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Number of connections registered so far.
    pub fn listener_count(&self) -> usize {
        self.registered
    }

    /// Maximum number of connections.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// True once a handler is bound.
    pub fn has_handler(&self) -> bool {
        self.handler.is_some() || self.started
    }

    /// True once the dispatch loop owns the channel.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Bind the handler. Must happen before the dispatch loop starts.
    pub fn set_handler(&mut self, handler: impl Handler) -> Result<()> {
        if self.started {
            return Err(ChannelError::AlreadyStarted(self.name.clone()));
        }
        self.handler = Some(Box::new(handler));
        Ok(())
    }

    /// Create a connection, keep its provider end, and return the consumer end.
    pub(crate) fn open_connection(&mut self, id: ConnectionId) -> Result<IpcStream> {
        if self.started {
            return Err(ChannelError::RegistrationClosed(self.name.clone()));
        }
        if self.registered >= self.config.capacity {
            return Err(ChannelError::CapacityExceeded {
                channel: self.name.clone(),
                capacity: self.config.capacity,
            });
        }

        let (provider, consumer) = IpcStream::pair()?;
        self.listeners.push(Listener {
            id,
            stream: provider,
        });
        self.registered += 1;
        debug!(
            channel = %self.name,
            connection = %id,
            listeners = self.registered,
            "registered connection"
        );
        Ok(consumer)
    }

    /// Fail unless [`take_for_dispatch`](Self::take_for_dispatch) would succeed.
    pub(crate) fn check_startable(&self) -> Result<()> {
        if self.started {
            return Err(ChannelError::AlreadyStarted(self.name.clone()));
        }
        if self.handler.is_none() {
            return Err(ChannelError::NoHandler(self.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// Hand listeners and handler to the dispatch loop, freezing the channel.
    pub(crate) fn take_for_dispatch(&mut self) -> Result<(Vec<Listener>, Box<dyn Handler>)> {
        self.check_startable()?;
        let handler = self
            .handler
            .take()
            .ok_or_else(|| ChannelError::NoHandler(self.name.clone()))?;
        self.started = true;
        Ok((std::mem::take(&mut self.listeners), handler))
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("listeners", &self.registered)
            .field("capacity", &self.config.capacity)
            .field("has_handler", &self.has_handler())
            .field("started", &self.started)
            .finish()
    }
}
