//! Candela Bus Protocol
//!
//! Message types and wire codec for the Candela luminaire network: a set of
//! autonomous lighting nodes sharing one multi-drop, half-duplex bus.
//!
//! # Wire Format
//!
//! Every frame is `tag byte` followed by an optional payload of at most
//! [`MAX_PAYLOAD`] bytes. A one-byte frame carries an empty payload. Frames
//! are decoded exactly once at the receive boundary into [`Message`], so an
//! invalid tag/payload combination is unrepresentable past that point.

mod message;
mod wire;

pub use message::{Message, NodeId};
pub use wire::WireError;

/// Capacity of a node's receive buffer, in bytes. Frames longer than this
/// are rejected whole, never truncated.
pub const MAX_FRAME: usize = 64;

/// Maximum payload length: everything after the tag byte.
pub const MAX_PAYLOAD: usize = MAX_FRAME - 1;
