//! Node identifiers and the application message set.

use std::fmt;

/// Protocol identifier of a luminaire node.
///
/// Assigned once when the node claims a bus address and immutable for the
/// process lifetime. Offset by a fixed constant, it doubles as the node's
/// bus address (see `candela-node`'s allocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u8);

impl NodeId {
    /// Raw identifier value.
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// A fully decoded bus message.
///
/// One variant per wire tag, each carrying its own payload type. "No unread
/// message" is `Option<Message>` at the inbox, never a sentinel variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A node has just claimed an address and joined the network.
    Wakeup,
    /// A text command forwarded to a specific node for execution.
    Command(Vec<u8>),
    /// Result of a remotely executed command, relayed back to the operator.
    Reply(Vec<u8>),
    /// Unsolicited measurement stream data, relayed like a reply.
    Stream(Vec<u8>),
    /// Election broadcast: the named node is starting a calibration round.
    /// Concurrent announcements are resolved deterministically — the
    /// lowest announcing id drives the round.
    BeginCalibration(NodeId),
    /// Id-discovery response: the sender's own identifier.
    FindHighestId(NodeId),
    /// The maestro's order: node `i` runs its calibration slot now.
    CalibrateId(NodeId),
    /// The calibration round is over; everyone returns to idle.
    EndCalibration,
}

impl Message {
    /// Wire tag for this message. Tag 0 is reserved and never transmitted.
    pub const fn tag(&self) -> u8 {
        match self {
            Message::Wakeup => 1,
            Message::Command(_) => 2,
            Message::Reply(_) => 3,
            Message::Stream(_) => 4,
            Message::BeginCalibration(_) => 5,
            Message::FindHighestId(_) => 6,
            Message::CalibrateId(_) => 7,
            Message::EndCalibration => 8,
        }
    }

    /// Human-readable tag name, for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Message::Wakeup => "wakeup",
            Message::Command(_) => "command",
            Message::Reply(_) => "reply",
            Message::Stream(_) => "stream",
            Message::BeginCalibration(_) => "begin-calibration",
            Message::FindHighestId(_) => "find-highest-id",
            Message::CalibrateId(_) => "calibrate-id",
            Message::EndCalibration => "end-calibration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId(3).to_string(), "node3");
    }

    #[test]
    fn tags_are_distinct_and_nonzero() {
        let msgs = [
            Message::Wakeup,
            Message::Command(vec![]),
            Message::Reply(vec![]),
            Message::Stream(vec![]),
            Message::BeginCalibration(NodeId(0)),
            Message::FindHighestId(NodeId(0)),
            Message::CalibrateId(NodeId(0)),
            Message::EndCalibration,
        ];
        let mut tags: Vec<u8> = msgs.iter().map(Message::tag).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), msgs.len());
        assert!(!tags.contains(&0));
    }
}
