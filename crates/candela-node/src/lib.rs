//! Candela Luminaire Node
//!
//! A self-organizing lighting node on a shared multi-drop bus. Nodes claim
//! unique addresses without central configuration, elect a coordinator
//! ("maestro"), and run a sequential, interference-aware calibration round
//! that measures each node's own sensor gain and the cross-coupling from
//! every neighbor.
//!
//! # Architecture
//!
//! - [`allocator`]: probe-and-claim address self-assignment at startup.
//! - [`Inbox`]: the single-slot mailbox shared between the transport's
//!   receive context and the main event loop, behind one short critical
//!   section. Lossy by design: a newer message overwrites an undrained one.
//! - [`QuietTimer`]: rearmable inactivity deadlines — convergence is
//!   detected as "no more messages for a full window", not by counting
//!   acknowledgments from an unknown population.
//! - [`Calibrator`]: the distributed calibration state machine, pure of
//!   I/O; it emits [`Directive`]s that [`LuminaireNode::tick`] executes.
//! - [`LuminaireNode`]: owns the port, inbox, machine, and the external
//!   collaborators (duty controller, illuminance sensor, command parser).

pub mod allocator;
mod calibrate;
mod config;
mod coordinator;
mod error;
mod inbox;
mod node;
mod timer;

pub use calibrate::{
    external_component, linear_gain, CommandParser, DutyControl, GainTable,
    IlluminanceSensor, SelfCalibration,
};
pub use config::NodeConfig;
pub use coordinator::{Calibrator, Directive, Phase};
pub use error::{Error, Result};
pub use inbox::{Inbox, SoftError};
pub use node::LuminaireNode;
pub use timer::QuietTimer;
