//! Step estimator.
//!
//! Hardware pedometers report in bursts, often several seconds apart. To keep
//! the displayed count moving smoothly, the estimator interpolates from the
//! last real tick using a cadence derived from accelerometer magnitude:
//!
//! ```text
//! display = last_real + floor(cadence * seconds_since_last_real)
//! ```
//!
//! clamped to `[last_real, last_real + floor(max_cadence * seconds)]` and
//! never below a previous estimate for the same tick. Every real tick snaps
//! the anchor back to the authoritative count.
//!
//! The acceleration-to-cadence curve is a tunable heuristic; only its bounds
//! are guaranteed.

use crate::config::EstimatorConfig;
use crate::types::MovementState;

const CADENCE_EPSILON: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct StepEstimator {
    config: EstimatorConfig,
    last_real_count: u64,
    last_real_timestamp_ms: Option<u64>,
    cadence: f64,
    /// Highest estimate handed out since the last real tick.
    last_estimate: u64,
}

impl StepEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            last_real_count: 0,
            last_real_timestamp_ms: None,
            cadence: 0.0,
            last_estimate: 0,
        }
    }

    /// Snap to an authoritative step count.
    pub fn on_real_step_updated(&mut self, step_count: u64, timestamp_ms: u64) {
        self.last_real_count = step_count;
        self.last_real_timestamp_ms = Some(timestamp_ms);
        self.last_estimate = step_count;
    }

    /// Update the cadence from one accelerometer sample and return the
    /// interpolated step count for display.
    pub fn estimate(
        &mut self,
        movement: Option<MovementState>,
        acceleration: f64,
        timestamp_ms: u64,
    ) -> u64 {
        self.update_cadence(movement, acceleration);
        self.current(timestamp_ms)
    }

    /// Interpolated count at `timestamp_ms` without touching the cadence.
    pub fn current(&mut self, timestamp_ms: u64) -> u64 {
        let Some(anchor) = self.last_real_timestamp_ms else {
            return self.last_real_count;
        };

        let elapsed_ms = timestamp_ms
            .saturating_sub(anchor)
            .min(self.config.max_interpolation_ms);
        let seconds = elapsed_ms as f64 / 1000.0;

        let interpolated = (self.cadence * seconds).floor().max(0.0) as u64;
        let ceiling = (self.config.max_plausible_cadence * seconds).floor().max(0.0) as u64;
        let estimate = self.last_real_count + interpolated.min(ceiling);

        self.last_estimate = self.last_estimate.max(estimate);
        self.last_estimate
    }

    /// Cadence currently used for interpolation, in steps per second.
    pub fn estimated_steps_per_second(&self) -> f64 {
        self.cadence
    }

    pub fn last_real_count(&self) -> u64 {
        self.last_real_count
    }

    pub fn reset(&mut self) {
        self.last_real_count = 0;
        self.last_real_timestamp_ms = None;
        self.cadence = 0.0;
        self.last_estimate = 0;
    }

    fn update_cadence(&mut self, movement: Option<MovementState>, acceleration: f64) {
        let c = &self.config;
        let base = match movement {
            Some(MovementState::Walking) => c.walking_base_cadence,
            Some(MovementState::Running) => c.running_base_cadence,
            Some(MovementState::Stationary) | None => {
                self.cadence *= c.stationary_decay;
                if self.cadence < CADENCE_EPSILON {
                    self.cadence = 0.0;
                }
                return;
            }
        };

        let target = (base + c.cadence_per_accel * acceleration.max(0.0))
            .clamp(c.min_walking_cadence, c.max_plausible_cadence);
        self.cadence += c.cadence_smoothing * (target - self.cadence);
        self.cadence = self.cadence.clamp(0.0, c.max_plausible_cadence);
    }
}

impl Default for StepEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}
