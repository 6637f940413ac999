//! Bus address self-assignment.
//!
//! A joining node probes candidate addresses upward from [`ADDR_OFFSET`]
//! until one goes unacknowledged, claims it for its peripheral role, and
//! announces itself with a `Wakeup` broadcast. No central configuration:
//! the claimed address, minus the offset, is the node's protocol id.

use std::sync::Arc;

use candela_bus::{probe, send_frame, BusAddr, BusPort, TxStatus, BROADCAST};
use candela_proto::{Message, NodeId};
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::inbox::Inbox;

/// First candidate bus address; ids map to addresses at this offset.
pub const ADDR_OFFSET: u8 = 0x08;

/// Last candidate bus address (7-bit space).
pub const ADDR_MAX: u8 = 0x7f;

/// Largest node id the address space can hold.
pub const MAX_NODE_ID: u8 = ADDR_MAX - ADDR_OFFSET;

/// The bus address assigned to a node id.
///
/// Only defined for ids up to [`MAX_NODE_ID`]; callers taking ids from
/// outside the protocol (e.g. parsed command targets) must range-check
/// first.
pub fn bus_addr(id: NodeId) -> BusAddr {
    debug_assert!(id.0 <= MAX_NODE_ID, "node id {id} outside the address space");
    BusAddr(ADDR_OFFSET.wrapping_add(id.0))
}

/// Send a frame, retrying while the bus reports arbitration loss, up to
/// `retries` additional attempts. Terminal outcomes are returned as-is.
pub fn send_with_retry(
    port: &mut dyn BusPort,
    addr: BusAddr,
    frame: &[u8],
    retries: u32,
) -> TxStatus {
    let mut status = send_frame(port, addr, frame);
    let mut attempt = 0;
    while status.is_retryable() && attempt < retries {
        attempt += 1;
        trace!(%addr, attempt, "retrying after arbitration loss");
        status = send_frame(port, addr, frame);
    }
    status
}

/// Claim a unique bus address and return the derived node id.
///
/// Probing semantics per candidate:
/// - acknowledged → address in use, advance;
/// - busy → retry the same candidate, bounded by `retries`;
/// - timeout → treated as in use (never claim an address that might be
///   occupied), advance;
/// - unacknowledged → free: register the inbox handler there and announce
///   with `Wakeup`.
pub(crate) fn join(
    port: &mut dyn BusPort,
    inbox: &Arc<Inbox>,
    retries: u32,
) -> Result<NodeId> {
    let mut probed = 0;
    for candidate in ADDR_OFFSET..=ADDR_MAX {
        let addr = BusAddr(candidate);
        probed += 1;

        let mut status = probe(port, addr);
        let mut attempt = 0;
        while status.is_retryable() {
            if attempt >= retries {
                return Err(Error::BusContention { retries });
            }
            attempt += 1;
            status = probe(port, addr);
        }

        match status {
            TxStatus::Ok | TxStatus::Timeout => {
                trace!(%addr, %status, "address taken");
            }
            TxStatus::NoDevice => {
                port.listen(addr, inbox.handler());
                let id = NodeId(candidate - ADDR_OFFSET);

                // Announce. Alone on the bus this cannot complete; that is
                // fine, there is no one to tell.
                let frame = Message::Wakeup.to_frame()?;
                let announce = send_with_retry(port, BROADCAST, &frame, retries);
                if announce != TxStatus::Ok {
                    debug!(%id, %announce, "wakeup broadcast did not complete");
                }

                info!(%id, %addr, "claimed bus address");
                return Ok(id);
            }
            TxStatus::Busy => unreachable!("busy handled by the retry loop"),
        }
    }
    Err(Error::NoAddressAvailable { probed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candela_bus::sim::SimNetwork;

    #[test]
    fn ids_are_assigned_in_probe_order() {
        let net = SimNetwork::new();

        let mut port_a = net.port();
        let inbox_a = Arc::new(Inbox::new());
        assert_eq!(join(&mut port_a, &inbox_a, 3).unwrap(), NodeId(0));

        let mut port_b = net.port();
        let inbox_b = Arc::new(Inbox::new());
        assert_eq!(join(&mut port_b, &inbox_b, 3).unwrap(), NodeId(1));

        let mut port_c = net.port();
        let inbox_c = Arc::new(Inbox::new());
        assert_eq!(join(&mut port_c, &inbox_c, 3).unwrap(), NodeId(2));

        assert_eq!(net.peripheral_count(), 3);
    }

    #[test]
    fn later_joiners_announce_to_earlier_ones() {
        let net = SimNetwork::new();

        let mut port_a = net.port();
        let inbox_a = Arc::new(Inbox::new());
        join(&mut port_a, &inbox_a, 3).unwrap();
        // The first node is alone; its own wakeup cannot complete.
        assert_eq!(inbox_a.take(), None);

        let mut port_b = net.port();
        let inbox_b = Arc::new(Inbox::new());
        join(&mut port_b, &inbox_b, 3).unwrap();

        // The second node's announcement reached the first.
        assert_eq!(inbox_a.take(), Some(Message::Wakeup));
    }

    #[test]
    fn id_to_addr_round_trip() {
        assert_eq!(bus_addr(NodeId(0)), BusAddr(ADDR_OFFSET));
        assert_eq!(bus_addr(NodeId(5)), BusAddr(ADDR_OFFSET + 5));
    }
}
