//! The luminaire node: event loop, dispatch, and command forwarding.

use std::sync::Arc;
use std::thread::sleep;

use candela_bus::{send_frame, BusPort, TxStatus, BROADCAST};
use candela_proto::{Message, NodeId};
use tracing::{debug, info, warn};

use crate::allocator::{self, bus_addr, send_with_retry, MAX_NODE_ID};
use crate::calibrate::{self, CommandParser, DutyControl, IlluminanceSensor};
use crate::config::NodeConfig;
use crate::coordinator::{Calibrator, Directive, Phase};
use crate::error::{Error, Result};
use crate::inbox::Inbox;

/// One autonomous lighting node on the shared bus.
///
/// Owns its transport port, the inbox shared with the receive context, the
/// calibration state machine, and the external collaborators (controller,
/// sensor, parser). There are no process-wide singletons: the inbox handle
/// is threaded into the transport's receive registration at join time.
pub struct LuminaireNode<B, C, S, P>
where
    B: BusPort,
    C: DutyControl,
    S: IlluminanceSensor,
    P: CommandParser,
{
    port: B,
    inbox: Arc<Inbox>,
    calibrator: Calibrator,
    controller: C,
    sensor: S,
    parser: P,
    config: NodeConfig,
    id: NodeId,
    output: Vec<String>,
}

impl<B, C, S, P> LuminaireNode<B, C, S, P>
where
    B: BusPort,
    C: DutyControl,
    S: IlluminanceSensor,
    P: CommandParser,
{
    /// Join the network: claim an address, register the receive handler,
    /// and (on id 0) arm the join debounce that will eventually start the
    /// first calibration round.
    pub fn join(mut port: B, controller: C, sensor: S, parser: P, config: NodeConfig) -> Result<Self> {
        let inbox = Arc::new(Inbox::new());
        let id = allocator::join(&mut port, &inbox, config.broadcast_retries)?;

        let mut calibrator = Calibrator::new(id, config.join_quiet, config.id_quiet);
        if id == NodeId(0) {
            calibrator.arm_join_quiet();
        }

        Ok(Self {
            port,
            inbox,
            calibrator,
            controller,
            sensor,
            parser,
            config,
            id,
            output: Vec::new(),
        })
    }

    /// This node's protocol id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether this node is the elected maestro of a running round.
    pub fn is_maestro(&self) -> bool {
        self.calibrator.is_maestro()
    }

    /// Whether a calibration round is active on this node, in any role.
    pub fn in_run(&self) -> bool {
        self.calibrator.in_run()
    }

    /// The coordinator's driver phase.
    pub fn phase(&self) -> Phase {
        self.calibrator.phase()
    }

    /// The gain learned for node `id` in the most recent round.
    pub fn gain(&self, id: NodeId) -> Option<f32> {
        self.calibrator.gains().get(id)
    }

    /// Ambient light measured during this node's own slot.
    pub fn external_luminance(&self) -> Option<f32> {
        self.calibrator.gains().external_luminance()
    }

    /// Highest node id observed during discovery.
    pub fn highest_seen(&self) -> Option<NodeId> {
        self.calibrator.highest_seen()
    }

    /// Rounds this node drove to completion as maestro.
    pub fn runs_driven(&self) -> u32 {
        self.calibrator.runs_driven()
    }

    /// Relayed replies and stream data received since the last drain.
    pub fn drain_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Queue a calibration round; the election happens on the next tick.
    pub fn request_calibration(&mut self) -> Result<()> {
        self.calibrator.request_run()
    }

    /// One turn of the event loop. Safe to call in a busy loop.
    ///
    /// Drains the pending soft error, takes-and-clears the inbox (one
    /// short critical section), dispatches the message, then polls the
    /// coordinator for timer-driven progress. Protocol failures inside a
    /// tick are soft: logged and absorbed, never propagated.
    pub fn tick(&mut self) {
        if let Some(err) = self.inbox.take_error() {
            warn!(id = %self.id, %err, "soft bus error");
        }

        if let Some(msg) = self.inbox.take() {
            self.dispatch(msg);
        }

        if let Some(directive) = self.calibrator.poll() {
            self.execute(directive);
        }
    }

    /// Process a user-facing command line: execute locally if it targets
    /// this node, otherwise forward it over the bus.
    ///
    /// Error taxonomy matters to the caller: [`Error::LocalCommandFailed`]
    /// means the target executed and said no; [`Error::BusTimeout`] and
    /// [`Error::Unreachable`] mean the target never answered.
    pub fn process_command(&mut self, line: &str) -> Result<Option<String>> {
        let target = self.parser.target_node(line).ok_or(Error::BadCommand)?;

        if target == self.id {
            return match self.parser.execute(line) {
                Some(reply) => Ok(Some(reply)),
                None => Err(Error::LocalCommandFailed),
            };
        }

        // The parser accepts any u8; only ids that fit the address space
        // map to a bus address.
        if target.value() > MAX_NODE_ID {
            return Err(Error::BadCommand);
        }

        let addr = bus_addr(target);
        let frame = Message::Command(line.as_bytes().to_vec()).to_frame()?;
        match send_frame(&mut self.port, addr, &frame) {
            TxStatus::Ok => Ok(None),
            TxStatus::Timeout => Err(Error::BusTimeout { addr }),
            status => Err(Error::Unreachable { target, status }),
        }
    }

    fn dispatch(&mut self, msg: Message) {
        match msg {
            Message::Command(bytes) => {
                let line = String::from_utf8_lossy(&bytes).into_owned();
                debug!(id = %self.id, command = %line, "executing forwarded command");
                match self.parser.execute(&line) {
                    Some(reply) => {
                        if let Err(err) = self.broadcast(&Message::Reply(reply.into_bytes())) {
                            warn!(id = %self.id, %err, "could not send command reply");
                        }
                    }
                    None => warn!(id = %self.id, command = %line, "forwarded command failed"),
                }
            }

            Message::Reply(bytes) | Message::Stream(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                info!(id = %self.id, %text, "relay");
                self.output.push(text);
            }

            other => {
                if let Some(directive) = self.calibrator.receive(&other) {
                    self.execute(directive);
                }
            }
        }
    }

    fn execute(&mut self, directive: Directive) {
        match directive {
            Directive::Broadcast(msg) => {
                let is_election = matches!(msg, Message::BeginCalibration(_));
                if let Err(err) = self.broadcast(&msg) {
                    if is_election {
                        // Bounded-retry replacement for the known stall
                        // when calibrating alone on the bus.
                        warn!(id = %self.id, %err, "begin-calibration broadcast failed");
                        self.calibrator.abort_run();
                    } else {
                        warn!(id = %self.id, %err, kind = msg.kind(), "broadcast failed");
                    }
                }
            }

            Directive::RunSlot(slot) => {
                debug!(id = %self.id, %slot, "calibrating luminaire");
                if let Err(err) = self.broadcast(&Message::CalibrateId(slot)) {
                    // Proceed anyway: the shared wait constants keep the
                    // others roughly aligned for the following slots.
                    warn!(id = %self.id, %slot, %err, "slot announcement failed");
                }
                self.run_slot(slot);
                // Only the driver paces the sequence: wait out the active
                // node's shutdown, then a slack window, before ordering
                // the next slot.
                if slot != self.id {
                    sleep(self.config.steady_state);
                }
                sleep(self.config.settle_slack);
            }

            Directive::SelfCalibrate => self.run_slot(self.id),

            Directive::PassiveCalibrate(slot) => self.run_slot(slot),

            Directive::Finish => {
                if let Err(err) = self.broadcast(&Message::EndCalibration) {
                    warn!(id = %self.id, %err, "end-calibration broadcast failed");
                }
                info!(id = %self.id, "calibration round complete");
            }
        }
    }

    /// The local side of one calibration slot: drive and measure our own
    /// luminaire, or sample a neighbor's contribution passively.
    fn run_slot(&mut self, slot: NodeId) {
        if slot == self.id {
            let cal = calibrate::self_calibrate(&mut self.controller, &mut self.sensor, &self.config);
            self.calibrator.record_self(cal);
        } else {
            let gain = calibrate::passive_calibrate(&mut self.sensor, &self.config);
            self.calibrator.record_gain(slot, gain);
        }
    }

    fn broadcast(&mut self, msg: &Message) -> Result<()> {
        let frame = msg.to_frame()?;
        let retries = self.config.broadcast_retries;
        match send_with_retry(&mut self.port, BROADCAST, &frame, retries) {
            TxStatus::Ok => Ok(()),
            TxStatus::Timeout => Err(Error::BusTimeout { addr: BROADCAST }),
            _ => Err(Error::BusContention { retries }),
        }
    }
}
