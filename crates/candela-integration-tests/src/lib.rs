//! Shared fixtures for whole-network tests.
//!
//! [`LightWorld`] is the optical side of the simulation: every node's
//! output couples onto every node's sensor through a fixed gain matrix,
//! on top of a constant ambient level. A calibration round run against it
//! should recover exactly that matrix, row by row.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use candela_bus::BusPort;
use candela_node::{
    CommandParser, DutyControl, IlluminanceSensor, LuminaireNode,
};
use candela_proto::NodeId;
use tracing_subscriber::EnvFilter;

/// Honor `RUST_LOG` in test runs; safe to call from every test.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Ground-truth optical model shared by all simulated luminaires.
pub struct LightWorld {
    duties: Vec<f32>,
    /// `coupling[observer][emitter]` in lux per unit duty cycle.
    pub coupling: Vec<Vec<f32>>,
    pub ambient: f32,
}

impl LightWorld {
    pub fn new(coupling: Vec<Vec<f32>>, ambient: f32) -> Arc<Mutex<Self>> {
        let nodes = coupling.len();
        Arc::new(Mutex::new(Self {
            duties: vec![0.0; nodes],
            coupling,
            ambient,
        }))
    }

    fn illuminance_at(&self, observer: usize) -> f32 {
        let coupled: f32 = self.coupling[observer]
            .iter()
            .zip(&self.duties)
            .map(|(gain, duty)| gain * duty)
            .sum();
        self.ambient + coupled
    }
}

/// Duty actuator writing into the shared world.
pub struct WorldController {
    world: Arc<Mutex<LightWorld>>,
    index: usize,
}

impl WorldController {
    pub fn new(world: &Arc<Mutex<LightWorld>>, index: usize) -> Self {
        Self {
            world: Arc::clone(world),
            index,
        }
    }
}

impl DutyControl for WorldController {
    fn set_duty_cycle(&mut self, duty: f32) {
        self.world.lock().expect("world lock poisoned").duties[self.index] = duty;
    }
}

/// Sensor reading the shared world at this node's position.
pub struct WorldSensor {
    world: Arc<Mutex<LightWorld>>,
    index: usize,
}

impl WorldSensor {
    pub fn new(world: &Arc<Mutex<LightWorld>>, index: usize) -> Self {
        Self {
            world: Arc::clone(world),
            index,
        }
    }
}

impl IlluminanceSensor for WorldSensor {
    fn measure_illuminance(&mut self, _samples: u32) -> f32 {
        self.world
            .lock()
            .expect("world lock poisoned")
            .illuminance_at(self.index)
    }
}

/// Sensor returning a pre-scripted sequence of readings, for
/// single-threaded tests with fully controlled tick order.
pub struct ScriptedSensor(VecDeque<f32>);

impl ScriptedSensor {
    pub fn new(readings: impl IntoIterator<Item = f32>) -> Self {
        Self(readings.into_iter().collect())
    }

    pub fn remaining(&self) -> usize {
        self.0.len()
    }
}

impl IlluminanceSensor for ScriptedSensor {
    fn measure_illuminance(&mut self, _samples: u32) -> f32 {
        self.0.pop_front().expect("sensor script exhausted")
    }
}

/// Controller that only remembers the last duty it was asked for.
#[derive(Default)]
pub struct LastDutyController(pub f32);

impl DutyControl for LastDutyController {
    fn set_duty_cycle(&mut self, duty: f32) {
        self.0 = duty;
    }
}

/// Parser for command lines of the form `<id> <text>`. Execution echoes
/// the text back; the text "fail" fails.
pub struct PrefixParser;

impl CommandParser for PrefixParser {
    fn target_node(&self, command: &str) -> Option<NodeId> {
        command
            .split_whitespace()
            .next()
            .and_then(|token| token.parse().ok())
            .map(NodeId)
    }

    fn execute(&mut self, command: &str) -> Option<String> {
        if command.contains("fail") {
            None
        } else {
            Some(format!("ok: {command}"))
        }
    }
}

/// Tick every node on its own thread for `duration`, then hand the nodes
/// back for inspection.
pub fn run_event_loops<B, C, S, P>(
    nodes: Vec<LuminaireNode<B, C, S, P>>,
    duration: Duration,
) -> Vec<LuminaireNode<B, C, S, P>>
where
    B: BusPort + Send + 'static,
    C: DutyControl + Send + 'static,
    S: IlluminanceSensor + Send + 'static,
    P: CommandParser + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let handles: Vec<_> = nodes
        .into_iter()
        .map(|mut node| {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    node.tick();
                    thread::sleep(Duration::from_millis(1));
                }
                node
            })
        })
        .collect();

    thread::sleep(duration);
    stop.store(true, Ordering::Relaxed);
    handles
        .into_iter()
        .map(|handle| handle.join().expect("event loop panicked"))
        .collect()
}
