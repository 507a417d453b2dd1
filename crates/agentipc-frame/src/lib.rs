//! Request framing and status replies for agentipc.
//!
//! Requests travel consumer to provider as a fixed-width ASCII envelope:
//! - 9 zero-padded decimal digits holding the payload length
//! - 1 separator byte (`' '`)
//! - the raw payload bytes
//!
//! Replies travel back in the agent control-protocol result format: a
//! 13-byte `"SSS LLLLLLLL\n"` header, the body, and a trailing newline.
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod reader;
pub mod reply;
pub mod status;
pub mod writer;

pub use codec::{
    decode_header, encode_header, encode_request, FrameConfig, Request, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE, MAX_REQUEST_LEN,
};
pub use error::{FrameError, Result};
pub use reader::{read_exact, ReplyReader, RequestReader};
pub use reply::{decode_reply, encode_reply, Reply, MAX_REPLY_LEN, REPLY_HEADER_SIZE};
pub use writer::{write_reply, RequestWriter};
