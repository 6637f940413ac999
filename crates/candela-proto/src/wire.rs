//! Frame encoding and decoding.

use thiserror::Error;

use crate::message::{Message, NodeId};
use crate::{MAX_FRAME, MAX_PAYLOAD};

/// Errors from framing or unframing a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// A frame must carry at least the tag byte.
    #[error("empty frame")]
    EmptyFrame,

    /// The tag byte does not name any known message.
    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    /// Payload would not fit the fixed receive buffer.
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// The payload length is wrong for this tag (e.g. an id message
    /// requires exactly one byte).
    #[error("tag {tag} expects {expected} payload bytes, got {got}")]
    BadLength { tag: u8, expected: usize, got: usize },
}

impl Message {
    /// Encode into a wire frame: tag byte followed by the payload.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireError> {
        let mut frame = Vec::with_capacity(MAX_FRAME);
        frame.push(self.tag());
        match self {
            Message::Wakeup | Message::EndCalibration => {}
            Message::Command(data) | Message::Reply(data) | Message::Stream(data) => {
                if data.len() > MAX_PAYLOAD {
                    return Err(WireError::PayloadTooLarge {
                        len: data.len(),
                        max: MAX_PAYLOAD,
                    });
                }
                frame.extend_from_slice(data);
            }
            Message::BeginCalibration(id)
            | Message::FindHighestId(id)
            | Message::CalibrateId(id) => frame.push(id.0),
        }
        Ok(frame)
    }

    /// Decode a received frame.
    ///
    /// This is the single decode point: callers past this boundary only
    /// ever see a well-formed [`Message`].
    pub fn from_frame(frame: &[u8]) -> Result<Message, WireError> {
        let (&tag, payload) = frame.split_first().ok_or(WireError::EmptyFrame)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        match tag {
            1 => expect_empty(tag, payload, Message::Wakeup),
            2 => Ok(Message::Command(payload.to_vec())),
            3 => Ok(Message::Reply(payload.to_vec())),
            4 => Ok(Message::Stream(payload.to_vec())),
            5 => expect_id(tag, payload).map(Message::BeginCalibration),
            6 => expect_id(tag, payload).map(Message::FindHighestId),
            7 => expect_id(tag, payload).map(Message::CalibrateId),
            8 => expect_empty(tag, payload, Message::EndCalibration),
            other => Err(WireError::UnknownTag(other)),
        }
    }
}

fn expect_empty(tag: u8, payload: &[u8], msg: Message) -> Result<Message, WireError> {
    if payload.is_empty() {
        Ok(msg)
    } else {
        Err(WireError::BadLength {
            tag,
            expected: 0,
            got: payload.len(),
        })
    }
}

fn expect_id(tag: u8, payload: &[u8]) -> Result<NodeId, WireError> {
    match payload {
        [id] => Ok(NodeId(*id)),
        _ => Err(WireError::BadLength {
            tag,
            expected: 1,
            got: payload.len(),
        }),
    }
}
