//! Movement state stabilizer.
//!
//! The raw accelerometer classification flickers between states from one
//! sample to the next. The stabilizer only adopts a new state after it has
//! been observed without interruption for `min_dwell_ms`.
//!
//! ```text
//! raw:     W W S W W W W W W ...
//! stable:  ? ? ? ? ? ? W W W ...   (dwell restarts at the S flicker)
//! ```

use tracing::debug;

use crate::config::StabilizerConfig;
use crate::types::MovementState;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    state: MovementState,
    since_ms: u64,
}

/// Hysteresis filter over raw movement classifications.
#[derive(Debug, Clone)]
pub struct MovementStateStabilizer {
    config: StabilizerConfig,
    stable: Option<MovementState>,
    candidate: Option<Candidate>,
}

impl MovementStateStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config,
            stable: None,
            candidate: None,
        }
    }

    /// Current stable state; `None` until the first state has settled.
    pub fn current(&self) -> Option<MovementState> {
        self.stable
    }

    /// Feed one raw classification and return the stable state.
    pub fn observe(
        &mut self,
        raw: MovementState,
        acceleration: f64,
        timestamp_ms: u64,
    ) -> Option<MovementState> {
        let observed = if raw.is_moving() && acceleration < self.config.motion_floor {
            MovementState::Stationary
        } else {
            raw
        };

        if Some(observed) == self.stable {
            self.candidate = None;
            return self.stable;
        }

        match self.candidate {
            Some(c) if c.state == observed => {
                if timestamp_ms.saturating_sub(c.since_ms) >= self.config.min_dwell_ms {
                    debug!(from = ?self.stable, to = ?observed, "movement state settled");
                    self.stable = Some(observed);
                    self.candidate = None;
                }
            }
            _ => {
                self.candidate = Some(Candidate {
                    state: observed,
                    since_ms: timestamp_ms,
                });
                // A zero dwell window adopts immediately.
                if self.config.min_dwell_ms == 0 {
                    self.stable = Some(observed);
                    self.candidate = None;
                }
            }
        }

        self.stable
    }

    pub fn reset(&mut self) {
        self.stable = None;
        self.candidate = None;
    }
}

impl Default for MovementStateStabilizer {
    fn default() -> Self {
        Self::new(StabilizerConfig::default())
    }
}
