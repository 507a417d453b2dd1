//! Connected endpoint pairs and readiness polling.
//!
//! This is the lowest layer of agentipc. A provider and a consumer talk over
//! the two halves of a Unix `socketpair(2)`; the provider side waits on many
//! such endpoints at once with `poll(2)`.
//!
//! Everything else builds on the [`IpcStream`] type and the [`wait_readable`]
//! readiness primitive provided here.

pub mod error;

#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
pub mod stream;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use poll::{wait_readable, Readiness};
#[cfg(unix)]
pub use stream::IpcStream;
