//! The shared single-slot mailbox between receive context and event loop.

use std::sync::{Arc, Mutex};

use candela_bus::RxHandler;
use candela_proto::{Message, WireError, MAX_FRAME};
use thiserror::Error;

/// A non-fatal receive-path failure, queued as a single most-recent value
/// and flushed on the next event-loop tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoftError {
    /// An incoming frame would not fit the receive buffer. The frame is
    /// dropped whole, never truncated.
    #[error("dropped oversized frame of {len} bytes (buffer holds {max})")]
    Oversized { len: usize, max: usize },

    /// An incoming frame failed to decode.
    #[error("dropped undecodable frame: {0}")]
    Malformed(WireError),
}

#[derive(Debug, Default)]
struct Slot {
    message: Option<Message>,
    error: Option<SoftError>,
}

/// Single-slot holder for the most recently received message.
///
/// The receive handler is the sole writer; the event loop is the sole
/// reader-and-clearer. Both sides go through `publish`/`take` only, each a
/// single short critical section — the mutual-exclusion contract is the
/// type's whole surface. A second message published before the first is
/// taken overwrites it: the inbox is lossy by design.
#[derive(Debug, Default)]
pub struct Inbox {
    slot: Mutex<Slot>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a decoded message, overwriting any undelivered one.
    pub fn publish(&self, message: Message) {
        self.slot.lock().expect("inbox lock poisoned").message = Some(message);
    }

    /// Atomically take-and-clear the pending message.
    pub fn take(&self) -> Option<Message> {
        self.slot.lock().expect("inbox lock poisoned").message.take()
    }

    /// Record a soft error, overwriting any unreported one.
    pub fn report(&self, error: SoftError) {
        self.slot.lock().expect("inbox lock poisoned").error = Some(error);
    }

    /// Take-and-clear the pending soft error.
    pub fn take_error(&self) -> Option<SoftError> {
        self.slot.lock().expect("inbox lock poisoned").error.take()
    }

    /// Receive-completion entry point: called with the raw frame in
    /// interrupt-equivalent context. Length is checked against the buffer
    /// capacity before anything is copied; the frame is decoded once and
    /// the message published last. No semantics, no blocking, no bus I/O.
    pub fn on_frame(&self, frame: &[u8]) {
        if frame.len() > MAX_FRAME {
            self.report(SoftError::Oversized {
                len: frame.len(),
                max: MAX_FRAME,
            });
            return;
        }
        match Message::from_frame(frame) {
            Ok(message) => self.publish(message),
            Err(err) => self.report(SoftError::Malformed(err)),
        }
    }

    /// The handler closure registered with the transport's peripheral role.
    pub fn handler(self: &Arc<Self>) -> RxHandler {
        let inbox = Arc::clone(self);
        Arc::new(move |frame: &[u8]| inbox.on_frame(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candela_proto::NodeId;

    #[test]
    fn take_clears_the_slot() {
        let inbox = Inbox::new();
        inbox.publish(Message::Wakeup);
        assert_eq!(inbox.take(), Some(Message::Wakeup));
        assert_eq!(inbox.take(), None);
    }

    #[test]
    fn second_publish_overwrites_first() {
        let inbox = Inbox::new();
        inbox.publish(Message::BeginCalibration(NodeId(0)));
        inbox.publish(Message::CalibrateId(NodeId(2)));
        // Only the most recent message is observed; the first is lost.
        assert_eq!(inbox.take(), Some(Message::CalibrateId(NodeId(2))));
        assert_eq!(inbox.take(), None);
    }

    #[test]
    fn oversized_frame_rejected_without_delivery() {
        let inbox = Inbox::new();
        inbox.publish(Message::Wakeup);

        let frame = vec![2u8; MAX_FRAME + 1];
        inbox.on_frame(&frame);

        // The pending message is untouched and the error is recorded.
        assert_eq!(
            inbox.take_error(),
            Some(SoftError::Oversized { len: MAX_FRAME + 1, max: MAX_FRAME })
        );
        assert_eq!(inbox.take(), Some(Message::Wakeup));
    }

    #[test]
    fn malformed_frame_becomes_soft_error() {
        let inbox = Inbox::new();
        inbox.on_frame(&[0xff]);
        assert!(matches!(
            inbox.take_error(),
            Some(SoftError::Malformed(WireError::UnknownTag(0xff)))
        ));
        assert_eq!(inbox.take(), None);
        // Flushed: a second read sees nothing.
        assert_eq!(inbox.take_error(), None);
    }

    #[test]
    fn handler_feeds_the_inbox() {
        let inbox = Arc::new(Inbox::new());
        let handler = inbox.handler();
        handler(&Message::FindHighestId(NodeId(4)).to_frame().unwrap());
        assert_eq!(inbox.take(), Some(Message::FindHighestId(NodeId(4))));
    }
}
