//! Gain measurement: collaborator traits, the gain math, and the
//! self/passive measurement routines.
//!
//! # Timing Assumption
//!
//! Passive calibration takes its two samples at the same fixed intervals
//! the active node uses for its two reference duties, with no handshake
//! confirming alignment. The sample windows line up only because every
//! node shares the same [`NodeConfig`](crate::NodeConfig) constants; the
//! configured slack absorbs clock drift. This is deliberate and inherited
//! from the protocol design — do not "fix" it with an acknowledgment.

use std::thread::sleep;

use candela_proto::NodeId;
use tracing::debug;

use crate::config::NodeConfig;

/// External feedback controller driving the node's light output.
/// Fire-and-forget: the duty change is assumed effective well before the
/// steady-state wait elapses.
pub trait DutyControl {
    /// Set the output duty cycle, as a fraction in `[0, 1]`.
    fn set_duty_cycle(&mut self, duty: f32);
}

/// External averaging illuminance sampler. Synchronous and blocking for
/// the duration of the measurement.
pub trait IlluminanceSensor {
    /// Average `samples` readings and return the illuminance in lux.
    fn measure_illuminance(&mut self, samples: u32) -> f32;
}

/// External text command parser, used by command dispatch (not by the
/// calibration coordinator).
pub trait CommandParser {
    /// The node a command is addressed to, if the command names one.
    fn target_node(&self, command: &str) -> Option<NodeId>;

    /// Execute a command locally. `None` signals execution failure.
    fn execute(&mut self, command: &str) -> Option<String>;
}

/// Result of a node measuring its own sensor's response to its own output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelfCalibration {
    /// Lux per unit duty cycle of this node's own output.
    pub gain: f32,
    /// Ambient light reaching the sensor from everything that is not this
    /// node's output, measured during the slot.
    pub external: f32,
}

/// Linear sensitivity of a sensor reading to a duty-cycle change.
pub fn linear_gain(lum1: f32, lum2: f32, duty1: f32, duty2: f32) -> f32 {
    (lum2 - lum1) / (duty2 - duty1)
}

/// The illuminance component not explained by the given output level.
pub fn external_component(lum: f32, gain: f32, duty: f32) -> f32 {
    lum - gain * duty
}

/// Run this node's own calibration slot: drive the output through the two
/// reference duties, sample at steady state, and leave the light off.
pub(crate) fn self_calibrate<C, S>(
    controller: &mut C,
    sensor: &mut S,
    config: &NodeConfig,
) -> SelfCalibration
where
    C: DutyControl,
    S: IlluminanceSensor,
{
    let (first_duty, second_duty) = config.reference_duties;

    controller.set_duty_cycle(first_duty);
    sleep(config.steady_state);
    let first_lum = sensor.measure_illuminance(config.sensor_samples);
    sleep(config.settle_slack);

    controller.set_duty_cycle(second_duty);
    sleep(config.steady_state);
    let second_lum = sensor.measure_illuminance(config.sensor_samples);

    let gain = linear_gain(first_lum, second_lum, first_duty, second_duty);
    let external = external_component(second_lum, gain, second_duty);
    debug!(gain, external, "self-calibration complete");

    sleep(config.settle_slack);
    // Off, so the remaining slots see only their own coupling.
    controller.set_duty_cycle(0.0);

    SelfCalibration { gain, external }
}

/// Observe another node's calibration slot: two samples at the shared
/// fixed intervals, own output untouched.
pub(crate) fn passive_calibrate<S>(sensor: &mut S, config: &NodeConfig) -> f32
where
    S: IlluminanceSensor,
{
    let (first_duty, second_duty) = config.reference_duties;

    sleep(config.steady_state);
    let first_lum = sensor.measure_illuminance(config.sensor_samples);
    sleep(config.settle_slack);

    sleep(config.steady_state);
    let second_lum = sensor.measure_illuminance(config.sensor_samples);
    sleep(config.settle_slack);

    let gain = linear_gain(first_lum, second_lum, first_duty, second_duty);
    debug!(gain, "passive calibration sample complete");
    gain
}

/// Per-run table of static gains: how strongly each node's output couples
/// onto this node's sensor, indexed by node id.
#[derive(Debug, Clone, Default)]
pub struct GainTable {
    gains: Vec<Option<f32>>,
    external: Option<f32>,
}

impl GainTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything at the start of a calibration run.
    pub fn reset(&mut self) {
        self.gains.clear();
        self.external = None;
    }

    /// Record the gain measured during node `id`'s slot. The slot sequence
    /// guarantees at most one write per id per run.
    pub fn set(&mut self, id: NodeId, gain: f32) {
        let idx = id.0 as usize;
        if self.gains.len() <= idx {
            self.gains.resize(idx + 1, None);
        }
        self.gains[idx] = Some(gain);
    }

    /// The gain learned for node `id`, if its slot has run.
    pub fn get(&self, id: NodeId) -> Option<f32> {
        self.gains.get(id.0 as usize).copied().flatten()
    }

    /// Record the ambient contribution measured during this node's own slot.
    pub fn set_external(&mut self, external: f32) {
        self.external = Some(external);
    }

    /// Ambient light measured during this node's own slot, if any.
    pub fn external_luminance(&self) -> Option<f32> {
        self.external
    }

    /// Number of nodes with a recorded gain.
    pub fn calibrated_count(&self) -> usize {
        self.gains.iter().filter(|g| g.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Sensor returning a scripted sequence of readings.
    struct ScriptedSensor(VecDeque<f32>);

    impl IlluminanceSensor for ScriptedSensor {
        fn measure_illuminance(&mut self, _samples: u32) -> f32 {
            self.0.pop_front().unwrap_or(0.0)
        }
    }

    /// Controller recording every duty it was asked to set.
    #[derive(Default)]
    struct RecordingController(Vec<f32>);

    impl DutyControl for RecordingController {
        fn set_duty_cycle(&mut self, duty: f32) {
            self.0.push(duty);
        }
    }

    fn zero_wait_config() -> NodeConfig {
        NodeConfig::fast()
            .with_steady_state(std::time::Duration::ZERO)
            .with_settle_slack(std::time::Duration::ZERO)
    }

    #[test]
    fn gain_formula() {
        let gain = linear_gain(100.0, 300.0, 0.2, 0.8);
        assert!((gain - 333.333_34).abs() < 0.01);
        let external = external_component(300.0, gain, 0.8);
        assert!((external - 33.333_34).abs() < 0.01);
    }

    #[test]
    fn self_calibration_drives_and_parks_the_output() {
        let config = zero_wait_config().with_reference_duties(0.2, 0.8);
        let mut controller = RecordingController::default();
        let mut sensor = ScriptedSensor(VecDeque::from([100.0, 300.0]));

        let cal = self_calibrate(&mut controller, &mut sensor, &config);

        // Two reference duties, then off.
        assert_eq!(controller.0, vec![0.2, 0.8, 0.0]);
        assert!((cal.gain - 333.333_34).abs() < 0.01);
        assert!((cal.external - 33.333_34).abs() < 0.01);
    }

    #[test]
    fn passive_calibration_never_touches_the_output() {
        let config = zero_wait_config().with_reference_duties(0.2, 0.8);
        let mut sensor = ScriptedSensor(VecDeque::from([100.0, 300.0]));

        let gain = passive_calibrate(&mut sensor, &config);
        assert!((gain - 333.333_34).abs() < 0.01);
    }

    #[test]
    fn gain_table_indexes_by_id() {
        let mut table = GainTable::new();
        table.set(NodeId(2), 5.5);
        table.set(NodeId(0), 1.0);

        assert_eq!(table.get(NodeId(0)), Some(1.0));
        assert_eq!(table.get(NodeId(1)), None);
        assert_eq!(table.get(NodeId(2)), Some(5.5));
        assert_eq!(table.calibrated_count(), 2);

        table.set_external(12.0);
        assert_eq!(table.external_luminance(), Some(12.0));

        table.reset();
        assert_eq!(table.get(NodeId(0)), None);
        assert_eq!(table.external_luminance(), None);
    }
}
