//! In-process provider/consumer IPC.
//!
//! A provider owns a channel and answers requests on a single dispatch
//! thread; each consumer thread talks to it over a private, pre-registered
//! socket-pair connection with a synchronous send-and-wait call.
//!
//! # Crate Structure
//!
//! - [`transport`]: socket pairs and `poll(2)` readiness
//! - [`frame`]: request envelope and status-reply codec
//! - [`channel`]: provider registry, consumer connections, dispatch loop

/// Re-export transport types.
pub mod transport {
    pub use agentipc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use agentipc_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use agentipc_channel::*;
}
