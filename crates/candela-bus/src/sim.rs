//! In-memory multi-drop bus simulation.
//!
//! All ports minted from one [`SimNetwork`] share the same wire. Delivery is
//! synchronous: a peripheral's [`RxHandler`] runs on the sender's call
//! stack, which stands in for the receive-completion interrupt of the real
//! transport. Handlers are invoked outside the bus lock, so a handler may
//! itself own a port.
//!
//! Seeded fault injection ([`FaultConfig`]) turns transactions into `Busy`
//! or `Timeout` outcomes for contention and loss testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::{BusAddr, BusPort, RxHandler, TxStatus, BROADCAST};

/// Fault-injection parameters for the simulated bus.
#[derive(Debug, Clone, Copy)]
pub struct FaultConfig {
    /// Probability that a transaction loses arbitration (`Busy`).
    pub busy_rate: f64,
    /// Probability that a transaction times out (`Timeout`).
    pub timeout_rate: f64,
    /// Seed for deterministic fault sequences.
    pub seed: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            busy_rate: 0.0,
            timeout_rate: 0.0,
            seed: 42,
        }
    }
}

struct SimState {
    peripherals: HashMap<u8, RxHandler>,
    rng: StdRng,
    faults: FaultConfig,
    latency: Duration,
}

/// A simulated multi-drop bus. Cheap to clone; all clones share the wire.
#[derive(Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<SimState>>,
}

impl SimNetwork {
    /// A fault-free bus.
    pub fn new() -> Self {
        Self::with_faults(FaultConfig::default())
    }

    /// A bus with seeded fault injection.
    pub fn with_faults(faults: FaultConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                peripherals: HashMap::new(),
                rng: StdRng::seed_from_u64(faults.seed),
                faults,
                latency: Duration::ZERO,
            })),
        }
    }

    /// Model wire occupancy: every successful transaction holds the bus
    /// for `latency` before completing. Concurrent senders serialize
    /// behind it, as on the real half-duplex wire.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().expect("bus lock poisoned").latency = latency;
        self
    }

    /// Mint a controller-role handle for one node.
    pub fn port(&self) -> SimPort {
        SimPort {
            state: Arc::clone(&self.state),
            own_addr: None,
            current: None,
        }
    }

    /// Number of registered peripherals.
    pub fn peripheral_count(&self) -> usize {
        self.state.lock().expect("bus lock poisoned").peripherals.len()
    }
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's handle onto a [`SimNetwork`].
pub struct SimPort {
    state: Arc<Mutex<SimState>>,
    own_addr: Option<BusAddr>,
    current: Option<(BusAddr, Vec<u8>)>,
}

impl BusPort for SimPort {
    fn begin_transaction(&mut self, addr: BusAddr) {
        self.current = Some((addr, Vec::new()));
    }

    fn write(&mut self, byte: u8) {
        if let Some((_, buf)) = self.current.as_mut() {
            buf.push(byte);
        }
    }

    fn end_transaction(&mut self, _is_final: bool) -> TxStatus {
        let Some((addr, frame)) = self.current.take() else {
            // end without begin: nothing was ever on the wire
            return TxStatus::NoDevice;
        };

        // Resolve targets under the lock, invoke handlers outside it.
        let handlers: Vec<RxHandler> = {
            let mut state = self.state.lock().expect("bus lock poisoned");

            let busy_rate = state.faults.busy_rate;
            let timeout_rate = state.faults.timeout_rate;
            if busy_rate > 0.0 && state.rng.gen_bool(busy_rate) {
                trace!(%addr, "injected arbitration loss");
                return TxStatus::Busy;
            }
            if timeout_rate > 0.0 && state.rng.gen_bool(timeout_rate) {
                trace!(%addr, "injected timeout");
                return TxStatus::Timeout;
            }

            let targets: Vec<RxHandler> = if addr == BROADCAST {
                // Framing on a general call is acknowledged by the other
                // peripherals; a node alone on the bus cannot complete it.
                // The controller role does not hear its own general call.
                let own = self.own_addr.map(|a| a.0);
                let others: Vec<RxHandler> = state
                    .peripherals
                    .iter()
                    .filter(|(&a, _)| Some(a) != own)
                    .map(|(_, h)| Arc::clone(h))
                    .collect();
                if others.is_empty() {
                    return TxStatus::Busy;
                }
                others
            } else {
                match state.peripherals.get(&addr.0) {
                    Some(handler) => vec![Arc::clone(handler)],
                    None => return TxStatus::NoDevice,
                }
            };

            // Hold the wire for the configured occupancy; a concurrent
            // sender blocks on the lock until the bus frees up.
            let latency = state.latency;
            if !latency.is_zero() {
                std::thread::sleep(latency);
            }
            targets
        };

        // A zero-length transaction is an address probe: it acknowledges
        // without a receive completion.
        if !frame.is_empty() {
            trace!(%addr, len = frame.len(), "frame delivered");
            for handler in handlers {
                handler(&frame);
            }
        }
        TxStatus::Ok
    }

    fn listen(&mut self, addr: BusAddr, on_receive: RxHandler) {
        self.own_addr = Some(addr);
        self.state
            .lock()
            .expect("bus lock poisoned")
            .peripherals
            .insert(addr.0, on_receive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{probe, send_frame};
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (RxHandler, Arc<StdMutex<Vec<Vec<u8>>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: RxHandler = Arc::new(move |frame: &[u8]| {
            sink.lock().unwrap().push(frame.to_vec());
        });
        (handler, seen)
    }

    #[test]
    fn probe_distinguishes_free_and_taken() {
        let net = SimNetwork::new();
        let mut a = net.port();
        let mut b = net.port();

        assert_eq!(probe(&mut a, BusAddr(0x08)), TxStatus::NoDevice);

        let (handler, seen) = recorder();
        b.listen(BusAddr(0x08), handler);
        assert_eq!(probe(&mut a, BusAddr(0x08)), TxStatus::Ok);
        // Probes carry no frame.
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unicast_delivery() {
        let net = SimNetwork::new();
        let mut a = net.port();
        let mut b = net.port();

        let (handler, seen) = recorder();
        b.listen(BusAddr(0x09), handler);

        assert_eq!(send_frame(&mut a, BusAddr(0x09), &[1, 2, 3]), TxStatus::Ok);
        assert_eq!(send_frame(&mut a, BusAddr(0x20), &[9]), TxStatus::NoDevice);
        assert_eq!(seen.lock().unwrap().as_slice(), &[vec![1, 2, 3]]);
    }

    #[test]
    fn broadcast_skips_the_sender() {
        let net = SimNetwork::new();
        let mut a = net.port();
        let mut b = net.port();
        let mut c = net.port();

        let (ha, seen_a) = recorder();
        let (hb, seen_b) = recorder();
        let (hc, seen_c) = recorder();
        a.listen(BusAddr(0x08), ha);
        b.listen(BusAddr(0x09), hb);
        c.listen(BusAddr(0x0a), hc);

        assert_eq!(send_frame(&mut a, BROADCAST, &[5]), TxStatus::Ok);
        // Everyone but the sender's own peripheral hears the general call.
        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(seen_b.lock().unwrap().len(), 1);
        assert_eq!(seen_c.lock().unwrap().len(), 1);
    }

    #[test]
    fn broadcast_alone_is_busy() {
        let net = SimNetwork::new();
        let mut a = net.port();
        let (ha, _) = recorder();
        a.listen(BusAddr(0x08), ha);

        // No other peripheral can acknowledge the general-call framing.
        assert_eq!(send_frame(&mut a, BROADCAST, &[5]), TxStatus::Busy);
    }

    #[test]
    fn injected_faults_are_deterministic() {
        let faults = FaultConfig {
            busy_rate: 1.0,
            timeout_rate: 0.0,
            seed: 7,
        };
        let net = SimNetwork::with_faults(faults);
        let mut a = net.port();
        let mut b = net.port();
        let (hb, _) = recorder();
        b.listen(BusAddr(0x09), hb);

        assert_eq!(send_frame(&mut a, BusAddr(0x09), &[1]), TxStatus::Busy);

        let timeouts = FaultConfig {
            busy_rate: 0.0,
            timeout_rate: 1.0,
            seed: 7,
        };
        let net = SimNetwork::with_faults(timeouts);
        let mut a = net.port();
        assert_eq!(send_frame(&mut a, BusAddr(0x09), &[1]), TxStatus::Timeout);
    }
}
