//! Provider channels, consumer connections, and dispatch for agentipc.
//!
//! A provider owns one channel. Each consumer thread that wants to talk to
//! the provider registers a private connection on that channel before the
//! provider starts; the provider's single dispatch thread then waits on all
//! of the channel's listeners at once and answers one request at a time.
//!
//! ```ignore
//! use agentipc_channel::{ChannelConfig, ProviderRegistry};
//! use agentipc_frame::Reply;
//!
//! let registry = ProviderRegistry::new();
//! registry.add_provider("vadmin", ChannelConfig::with_capacity(4))?;
//! registry.set_handler("vadmin", |req: &agentipc_frame::Request| Reply::ok("pong"))?;
//! registry.set_start("vadmin", ProviderRegistry::start)?;
//!
//! let mut consumer = registry.register("vadmin")?;
//! let handles = registry.start_all()?;
//! assert_eq!(consumer.send_text("ping")?.text()?, "pong");
//! ```

pub mod affinity;
pub mod channel;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod registry;

pub use affinity::{AffinityViolation, ConnectionId, ThreadAffinity};
pub use channel::{Channel, ChannelConfig, DEFAULT_CAPACITY, DEFAULT_REQUEST_TIMEOUT};
pub use consumer::Consumer;
pub use dispatch::{DispatchHandle, DispatchStats, StopSignal};
pub use error::{ChannelError, Result};
pub use handler::Handler;
pub use registry::{ProviderInfo, ProviderRegistry, StartRoutine};
