//! Node configuration.

use std::time::Duration;

/// Timing and calibration parameters for a luminaire node.
///
/// Every node on a bus must share the same values: slot ordering during
/// calibration is enforced by these constants, not by acknowledgments.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Join debounce: the prospective coordinator (id 0) waits until no
    /// `Wakeup` has arrived for this long before starting a round.
    pub join_quiet: Duration,

    /// Id-discovery debounce: the maestro ends discovery once no
    /// `FindHighestId` has arrived for this long.
    pub id_quiet: Duration,

    /// Time for the light/sensor pair to reach steady state after a duty
    /// change, and for the active node to finish its slot.
    pub steady_state: Duration,

    /// Slack after each measurement to absorb clock drift between nodes.
    pub settle_slack: Duration,

    /// The two reference duty cycles measured during a calibration slot.
    pub reference_duties: (f32, f32),

    /// Samples averaged per illuminance measurement.
    pub sensor_samples: u32,

    /// Retry ceiling for transactions that lose bus arbitration.
    pub broadcast_retries: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            join_quiet: Duration::from_millis(1500),
            id_quiet: Duration::from_millis(500),
            steady_state: Duration::from_millis(2000),
            settle_slack: Duration::from_millis(500),
            reference_duties: (0.0, 1.0),
            sensor_samples: 50,
            broadcast_retries: 10,
        }
    }
}

impl NodeConfig {
    /// A profile with millisecond-scale waits, for tests and simulation.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            join_quiet: Duration::from_millis(50),
            id_quiet: Duration::from_millis(25),
            steady_state: Duration::from_millis(40),
            settle_slack: Duration::from_millis(20),
            sensor_samples: 1,
            ..Default::default()
        }
    }

    /// Set the join debounce window.
    #[must_use]
    pub fn with_join_quiet(mut self, window: Duration) -> Self {
        self.join_quiet = window;
        self
    }

    /// Set the id-discovery debounce window.
    #[must_use]
    pub fn with_id_quiet(mut self, window: Duration) -> Self {
        self.id_quiet = window;
        self
    }

    /// Set the steady-state wait.
    #[must_use]
    pub fn with_steady_state(mut self, wait: Duration) -> Self {
        self.steady_state = wait;
        self
    }

    /// Set the post-measurement slack.
    #[must_use]
    pub fn with_settle_slack(mut self, slack: Duration) -> Self {
        self.settle_slack = slack;
        self
    }

    /// Set the two reference duty cycles.
    #[must_use]
    pub fn with_reference_duties(mut self, first: f32, second: f32) -> Self {
        self.reference_duties = (first, second);
        self
    }

    /// Set the arbitration-loss retry ceiling.
    #[must_use]
    pub fn with_broadcast_retries(mut self, retries: u32) -> Self {
        self.broadcast_retries = retries;
        self
    }

    /// Set the samples averaged per measurement.
    #[must_use]
    pub fn with_sensor_samples(mut self, samples: u32) -> Self {
        self.sensor_samples = samples;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let cfg = NodeConfig::fast()
            .with_reference_duties(0.2, 0.8)
            .with_broadcast_retries(3);
        assert_eq!(cfg.reference_duties, (0.2, 0.8));
        assert_eq!(cfg.broadcast_retries, 3);
        assert!(cfg.steady_state < Duration::from_millis(100));
    }
}
