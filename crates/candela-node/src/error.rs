//! Error types for candela-node.

use candela_bus::{BusAddr, TxStatus};
use candela_proto::{NodeId, WireError};
use thiserror::Error;

/// Result type for candela-node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while joining or operating on the bus.
#[derive(Debug, Error)]
pub enum Error {
    /// Every candidate address was already claimed; the node cannot
    /// participate in the network.
    #[error("no free bus address after probing {probed} candidates")]
    NoAddressAvailable { probed: usize },

    /// Bus contention persisted past the retry ceiling.
    #[error("bus contention persisted after {retries} attempts")]
    BusContention { retries: u32 },

    /// A transaction timed out; terminal for that attempt.
    #[error("transaction to {addr} timed out")]
    BusTimeout { addr: BusAddr },

    /// A remote node did not acknowledge a directly addressed frame.
    #[error("target {target} unreachable ({status})")]
    Unreachable { target: NodeId, status: TxStatus },

    /// A calibration run is already in progress on this node.
    #[error("a calibration run is already in progress")]
    CalibrationInProgress,

    /// The local parser executed the command and reported failure. Distinct
    /// from transport errors: the target was reached and said no.
    #[error("local command execution failed")]
    LocalCommandFailed,

    /// The command text names no target node.
    #[error("command names no target node")]
    BadCommand,

    /// A message could not be framed for the wire.
    #[error(transparent)]
    Wire(#[from] WireError),
}
