//! The distributed calibration coordinator.
//!
//! Every node runs a [`Calibrator`]; the node elected maestro drives the
//! top-level sequence while the others react to received messages. The
//! machine itself performs no bus I/O and no measurement: inbound messages
//! go through [`Calibrator::receive`], timer/phase progress through
//! [`Calibrator::poll`], and both return a [`Directive`] for the event
//! loop to execute. That keeps the current phase inspectable and the whole
//! protocol testable without a bus.
//!
//! # Convergence by Inactivity
//!
//! Neither the joining phase nor id discovery knows the population size in
//! advance, so "all expected responses received" is approximated by "no
//! response for a full debounce window" — one window of extra latency in
//! exchange for not needing acknowledgments on an unreliable bus.

use std::time::Duration;

use candela_proto::{Message, NodeId};
use tracing::{debug, info, trace, warn};

use crate::calibrate::{GainTable, SelfCalibration};
use crate::error::{Error, Result};
use crate::timer::QuietTimer;

/// Coordinator phase. `Discovering` and `Calibrating` are only ever
/// entered by the maestro; participants stay `Idle` and react to messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No run in progress (from this node's point of view as a driver).
    Idle,
    /// Maestro collecting `FindHighestId` responses under the id debounce.
    Discovering,
    /// Maestro sequencing slots; `next` is the next id to calibrate.
    Calibrating { next: u8 },
}

/// An action the event loop must perform on the machine's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Broadcast a message (bounded busy-retries). A failed
    /// `BeginCalibration` broadcast must be reported back via
    /// [`Calibrator::abort_run`].
    Broadcast(Message),
    /// Maestro slot: broadcast `CalibrateId(id)`, then run the local side
    /// of the slot (self or passive) and the settle waits.
    RunSlot(NodeId),
    /// Participant's own slot: run self-calibration.
    SelfCalibrate,
    /// Another node's slot: run passive calibration for it.
    PassiveCalibrate(NodeId),
    /// Broadcast `EndCalibration`; the local run is already closed.
    Finish,
}

/// Per-node calibration state machine.
#[derive(Debug)]
pub struct Calibrator {
    own_id: NodeId,
    maestro: bool,
    in_run: bool,
    pending_start: bool,
    phase: Phase,
    highest_seen: Option<NodeId>,
    join_quiet: QuietTimer,
    id_quiet: QuietTimer,
    join_window: Duration,
    id_window: Duration,
    gains: GainTable,
    runs_driven: u32,
}

impl Calibrator {
    pub fn new(own_id: NodeId, join_window: Duration, id_window: Duration) -> Self {
        Self {
            own_id,
            maestro: false,
            in_run: false,
            pending_start: false,
            phase: Phase::Idle,
            highest_seen: None,
            join_quiet: QuietTimer::new(),
            id_quiet: QuietTimer::new(),
            join_window,
            id_window,
            gains: GainTable::new(),
            runs_driven: 0,
        }
    }

    /// Whether this node is currently the elected maestro.
    pub fn is_maestro(&self) -> bool {
        self.maestro
    }

    /// Whether a calibration run is active on this node, in any role.
    pub fn in_run(&self) -> bool {
        self.in_run
    }

    /// Current driver phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Highest node id observed so far (monotone within a run).
    pub fn highest_seen(&self) -> Option<NodeId> {
        self.highest_seen
    }

    /// Gains learned during the most recent run.
    pub fn gains(&self) -> &GainTable {
        &self.gains
    }

    /// Number of rounds this node drove to completion as maestro.
    pub fn runs_driven(&self) -> u32 {
        self.runs_driven
    }

    /// Arm the join debounce. Done by the prospective coordinator (id 0)
    /// right after claiming its address.
    pub fn arm_join_quiet(&mut self) {
        self.join_quiet.rearm(self.join_window);
    }

    /// Queue an election attempt for the next poll.
    pub fn request_run(&mut self) -> Result<()> {
        if self.in_run {
            return Err(Error::CalibrationInProgress);
        }
        self.pending_start = true;
        Ok(())
    }

    /// Roll back a tentative election whose `BeginCalibration` broadcast
    /// never completed (e.g. alone on the bus). Soft failure: the caller
    /// may request again later.
    pub fn abort_run(&mut self) {
        warn!(id = %self.own_id, "election broadcast failed; returning to idle");
        self.maestro = false;
        self.in_run = false;
        self.phase = Phase::Idle;
        self.highest_seen = None;
        self.id_quiet.cancel();
    }

    /// Terminate the run and return to idle. Idempotent: ending while idle
    /// is a no-op, so a stray or echoed `EndCalibration` is harmless.
    pub fn end_run(&mut self) {
        if self.in_run {
            if self.maestro {
                self.runs_driven += 1;
            }
            info!(
                id = %self.own_id,
                calibrated = self.gains.calibrated_count(),
                "calibration run ended"
            );
        }
        self.maestro = false;
        self.in_run = false;
        self.pending_start = false;
        self.phase = Phase::Idle;
        self.join_quiet.cancel();
        self.id_quiet.cancel();
    }

    /// Record a passively measured gain for node `id`.
    pub fn record_gain(&mut self, id: NodeId, gain: f32) {
        self.gains.set(id, gain);
    }

    /// Record this node's own slot results.
    pub fn record_self(&mut self, cal: SelfCalibration) {
        self.gains.set(self.own_id, cal.gain);
        self.gains.set_external(cal.external);
    }

    fn note_id(&mut self, id: NodeId) {
        // Monotone within a run.
        if self.highest_seen.map_or(true, |h| id > h) {
            self.highest_seen = Some(id);
        }
    }

    fn join_run_as_participant(&mut self) {
        if !self.in_run {
            self.in_run = true;
            // An election we had queued is superseded: someone else is
            // the coordinator now.
            self.pending_start = false;
            self.highest_seen = None;
            self.gains.reset();
        }
    }

    /// Feed one received message through the machine.
    pub fn receive(&mut self, msg: &Message) -> Option<Directive> {
        match msg {
            Message::Wakeup => {
                // Another node joined. If we are the prospective
                // coordinator still debouncing the join phase, start the
                // window over.
                if self.own_id == NodeId(0) && self.join_quiet.is_armed() {
                    trace!("wakeup during join debounce; rearming");
                    self.join_quiet.rearm(self.join_window);
                }
                None
            }

            Message::BeginCalibration(sender) => {
                if *sender == self.own_id {
                    // Own announcement looped back; nothing new.
                    return None;
                }
                if self.maestro {
                    if *sender < self.own_id {
                        // Two rounds announced at once. The lower id wins;
                        // we step down and answer discovery like everyone
                        // else. The run itself continues under the winner.
                        debug!(
                            id = %self.own_id,
                            winner = %sender,
                            "concurrent election lost; stepping down"
                        );
                        self.maestro = false;
                        self.phase = Phase::Idle;
                        self.id_quiet.cancel();
                        self.highest_seen = None;
                        return Some(Directive::Broadcast(Message::FindHighestId(self.own_id)));
                    }
                    // The higher announcer yields to us; count it as a
                    // discovery response.
                    self.note_id(*sender);
                    self.id_quiet.rearm(self.id_window);
                    return None;
                }
                debug!(id = %self.own_id, maestro = %sender, "calibration round announced; responding with own id");
                self.join_run_as_participant();
                Some(Directive::Broadcast(Message::FindHighestId(self.own_id)))
            }

            Message::FindHighestId(id) => {
                self.note_id(*id);
                if self.maestro && self.phase == Phase::Discovering {
                    self.id_quiet.rearm(self.id_window);
                }
                None
            }

            Message::CalibrateId(id) => {
                if self.maestro {
                    // The maestro acts when driving the slot, not on its
                    // own echo.
                    return None;
                }
                // Also covers a participant that lost the BeginCalibration
                // announcement to an inbox overwrite.
                self.join_run_as_participant();
                self.note_id(*id);
                if *id == self.own_id {
                    Some(Directive::SelfCalibrate)
                } else {
                    Some(Directive::PassiveCalibrate(*id))
                }
            }

            Message::EndCalibration => {
                self.end_run();
                None
            }

            // Command traffic is dispatched before it reaches the
            // coordinator.
            Message::Command(_) | Message::Reply(_) | Message::Stream(_) => None,
        }
    }

    /// Advance on timers and the pending election request.
    pub fn poll(&mut self) -> Option<Directive> {
        // The would-be coordinator starts the round once no node has
        // joined for a full window.
        if self.own_id == NodeId(0) && !self.in_run && self.join_quiet.poll_fired() {
            debug!("join phase quiet; starting calibration round");
            self.pending_start = true;
        }

        if self.pending_start && !self.in_run {
            self.pending_start = false;
            self.maestro = true;
            self.in_run = true;
            self.phase = Phase::Discovering;
            self.highest_seen = Some(self.own_id);
            self.gains.reset();
            self.id_quiet.rearm(self.id_window);
            info!(id = %self.own_id, "initiating calibration round as maestro");
            return Some(Directive::Broadcast(Message::BeginCalibration(self.own_id)));
        }

        if !self.maestro {
            return None;
        }

        match self.phase {
            Phase::Idle => None,
            Phase::Discovering => {
                if self.id_quiet.poll_fired() {
                    let highest = self.highest_seen.unwrap_or(self.own_id);
                    info!(%highest, "id discovery converged");
                    self.phase = Phase::Calibrating { next: 0 };
                }
                None
            }
            Phase::Calibrating { next } => {
                let highest = self.highest_seen.unwrap_or(self.own_id);
                if next <= highest.0 {
                    self.phase = Phase::Calibrating { next: next + 1 };
                    Some(Directive::RunSlot(NodeId(next)))
                } else {
                    self.end_run();
                    Some(Directive::Finish)
                }
            }
        }
    }
}
