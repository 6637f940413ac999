//! Candela Network Simulator
//!
//! Spin up a simulated luminaire network on one in-memory bus, let it
//! self-organize and calibrate, then print the learned gain matrix next to
//! the ground-truth coupling it was supposed to discover.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use candela_bus::sim::{SimNetwork, SimPort};
use candela_node::{
    CommandParser, DutyControl, IlluminanceSensor, LuminaireNode, NodeConfig,
};
use candela_proto::NodeId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

/// Shared optical model: every node's light output couples onto every
/// node's sensor through a fixed gain matrix, on top of ambient light.
struct LightWorld {
    duties: Vec<f32>,
    /// `coupling[observer][emitter]` in lux per unit duty cycle.
    coupling: Vec<Vec<f32>>,
    ambient: f32,
}

impl LightWorld {
    fn random(nodes: usize, ambient: f32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let coupling = (0..nodes)
            .map(|observer| {
                (0..nodes)
                    .map(|emitter| {
                        if observer == emitter {
                            rng.gen_range(250.0..400.0)
                        } else {
                            rng.gen_range(40.0..150.0)
                        }
                    })
                    .collect()
            })
            .collect();
        Self {
            duties: vec![0.0; nodes],
            coupling,
            ambient,
        }
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

struct WorldController {
    world: Arc<Mutex<LightWorld>>,
    index: usize,
}

impl DutyControl for WorldController {
    fn set_duty_cycle(&mut self, duty: f32) {
        self.world.lock().expect("world lock poisoned").duties[self.index] = duty;
    }
}

struct WorldSensor {
    world: Arc<Mutex<LightWorld>>,
    index: usize,
}

impl IlluminanceSensor for WorldSensor {
    fn measure_illuminance(&mut self, _samples: u32) -> f32 {
        self.world
            .lock()
            .expect("world lock poisoned")
            .illuminance_at(self.index)
    }
}

/// Commands of the form `<id> <request>`; the simulator only answers ping.
struct PingParser;

impl CommandParser for PingParser {
    fn target_node(&self, command: &str) -> Option<NodeId> {
        command
            .split_whitespace()
            .next()
            .and_then(|token| token.parse().ok())
            .map(NodeId)
    }

    fn execute(&mut self, command: &str) -> Option<String> {
        command.contains("ping").then(|| "pong".to_string())
    }
}

type SimNode = LuminaireNode<SimPort, WorldController, WorldSensor, PingParser>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let node_count: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(3);
    let seed: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(42);
    let ambient = 25.0;

    println!("Candela Network Simulator");
    println!("=========================");
    println!();
    println!("{node_count} luminaires, seed {seed}, ambient {ambient} lux");
    println!();

    let world = Arc::new(Mutex::new(LightWorld::random(node_count, ambient, seed)));
    let net = SimNetwork::new().with_latency(Duration::from_millis(2));
    let config = NodeConfig::fast().with_reference_duties(0.2, 0.8);

    // Join sequentially so address claims cannot race, then let the
    // event loops run concurrently.
    let mut nodes: Vec<SimNode> = Vec::with_capacity(node_count);
    for index in 0..node_count {
        let node = LuminaireNode::join(
            net.port(),
            WorldController {
                world: Arc::clone(&world),
                index,
            },
            WorldSensor {
                world: Arc::clone(&world),
                index,
            },
            PingParser,
            config.clone(),
        )
        .unwrap_or_else(|err| {
            eprintln!("luminaire {index} could not join the bus: {err}");
            std::process::exit(1);
        });
        println!("  {} on the bus", node.id());
        nodes.push(node);
    }
    println!();

    // Join debounce, id discovery, then one slot per node; generous margin.
    let round = Duration::from_millis(300 + 400 * node_count as u64);
    println!("Running calibration round (~{} ms)...", round.as_millis());
    let nodes = run_event_loops(nodes, round);
    println!();

    let world = world.lock().expect("world lock poisoned");
    for node in &nodes {
        println!("{} (maestro rounds driven: {})", node.id(), node.runs_driven());
        let observer = node.id().value() as usize;
        for emitter in 0..node_count {
            let truth = world.coupling[observer][emitter];
            match node.gain(NodeId(emitter as u8)) {
                Some(gain) => println!(
                    "  gain from node{emitter}: {gain:8.2}  (actual {truth:8.2})"
                ),
                None => println!("  gain from node{emitter}:   <not calibrated>"),
            }
        }
        match node.external_luminance() {
            Some(external) => println!(
                "  external light:    {external:8.2}  (actual {:8.2})",
                world.ambient
            ),
            None => println!("  external light:      <not calibrated>"),
        }
    }
}

/// Tick every node on its own thread for `duration`, then hand the nodes
/// back for inspection.
fn run_event_loops(nodes: Vec<SimNode>, duration: Duration) -> Vec<SimNode> {
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
