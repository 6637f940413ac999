//! Candela Bus Transport
//!
//! A byte-oriented, addressed, half-duplex multi-drop bus. Every node holds
//! two roles on the same wire: a *controller* role used to originate
//! transactions to any address, and a *peripheral* role that accepts
//! transactions addressed to the node's claimed address.
//!
//! Transactions fail with a transient, retryable [`TxStatus::Busy`]
//! (arbitration lost / contention) or a terminal [`TxStatus::Timeout`].
//! [`TxStatus::NoDevice`] means nothing acknowledged the address — during
//! address probing that is the good outcome.
//!
//! The [`sim`] module provides an in-memory implementation of the bus for
//! tests and the demo binary.

pub mod sim;

use std::fmt;
use std::sync::Arc;

/// A 7-bit bus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusAddr(pub u8);

impl fmt::Display for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// The general-call address: every peripheral on the bus other than the
/// sender's own receives frames sent here.
pub const BROADCAST: BusAddr = BusAddr(0);

/// Outcome of a completed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// The addressed peripheral acknowledged the transaction.
    Ok,
    /// Arbitration lost or bus contention; transient, retry is reasonable.
    Busy,
    /// The transaction timed out; terminal for this attempt.
    Timeout,
    /// No peripheral acknowledged the address.
    NoDevice,
}

impl TxStatus {
    /// Whether retrying the same transaction can succeed.
    pub const fn is_retryable(self) -> bool {
        matches!(self, TxStatus::Busy)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::Ok => "ok",
            TxStatus::Busy => "busy",
            TxStatus::Timeout => "timeout",
            TxStatus::NoDevice => "no-device",
        };
        f.write_str(s)
    }
}

/// Receive-completion handler for the peripheral role.
///
/// Invoked in interrupt-equivalent context (in the simulation: on the
/// sender's call stack) with the raw frame bytes. Handlers must not block
/// and must not originate bus traffic; capture the frame and return.
pub type RxHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A node's handle onto the bus: controller-role transactions plus
/// peripheral-role registration.
///
/// Writes between `begin_transaction` and `end_transaction` are buffered
/// and delivered as one frame when the transaction ends.
pub trait BusPort: Send {
    /// Start a transaction addressed to `addr`.
    fn begin_transaction(&mut self, addr: BusAddr);

    /// Queue one byte into the current transaction.
    fn write(&mut self, byte: u8);

    /// Complete the current transaction. `is_final` releases the bus
    /// (a repeated-start probe passes `false`).
    fn end_transaction(&mut self, is_final: bool) -> TxStatus;

    /// Register this node's peripheral role at `addr`.
    ///
    /// Registration covers both peripheral duties: delivering received
    /// frames to `on_receive`, and acknowledging address-only transactions
    /// so that [`probe`] of this address reports `Ok`. The simulation acks
    /// implicitly for any registered address; a hardware transport with a
    /// separate request callback must install one that acks zero-length
    /// transactions as part of this call.
    fn listen(&mut self, addr: BusAddr, on_receive: RxHandler);
}

/// Send a whole frame in one transaction.
pub fn send_frame(port: &mut dyn BusPort, addr: BusAddr, frame: &[u8]) -> TxStatus {
    port.begin_transaction(addr);
    for &byte in frame {
        port.write(byte);
    }
    port.end_transaction(true)
}

/// Probe an address with a zero-length transaction.
///
/// `Ok` means something acknowledged (the address is taken); `NoDevice`
/// means it is free. The acknowledgment comes from the peripheral's
/// registration, not its receive handler; see [`BusPort::listen`].
pub fn probe(port: &mut dyn BusPort, addr: BusAddr) -> TxStatus {
    port.begin_transaction(addr);
    port.end_transaction(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_busy_is_retryable() {
        assert!(TxStatus::Busy.is_retryable());
        assert!(!TxStatus::Ok.is_retryable());
        assert!(!TxStatus::Timeout.is_retryable());
        assert!(!TxStatus::NoDevice.is_retryable());
    }

    #[test]
    fn addr_display() {
        assert_eq!(BusAddr(0x0b).to_string(), "0x0b");
        assert_eq!(BROADCAST.to_string(), "0x00");
    }
}
