//! Wire contract for the verdict RPC surface.
//!
//! The RPC is a single unary operation: a client sends a
//! [`ValidateRequest`] carrying string attributes and receives a
//! [`ValidateResponse`] with a permit/deny [`Effect`] and zero or more
//! obligation attributes.
//!
//! Messages travel as frames: a 4-byte big-endian length followed by a
//! JSON document, with a sanity cap on frame size. One response is
//! written per request, in order, per connection.

mod frame;
mod message;

pub use frame::{read_message, write_message};
pub use message::{Attribute, Effect, ValidateRequest, ValidateResponse};

/// Upper bound on a single frame's payload, in bytes.
pub const MAX_FRAME_LEN: usize = 1 << 20;
