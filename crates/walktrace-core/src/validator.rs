//! Step count validator.
//!
//! Each incremental pedometer delta is checked against the other evidence we
//! have (movement state, activity classification, GPS displacement and speed)
//! before it is allowed into the session's step count. Rules are evaluated in
//! order and the first match wins:
//!
//! 1. Non-positive deltas are accepted as a no-op.
//! 2. Stationary (or non-ambulatory) + no GPS displacement + elevated
//!    acceleration: the phone is being shaken, reject.
//! 3. GPS speed above a walking/running ceiling with a large delta: the user
//!    is in a vehicle, reject.
//! 4. Otherwise accept.

use serde::{Deserialize, Serialize};

use crate::config::ValidatorConfig;
use crate::distance::haversine_m;
use crate::types::{ActivityType, LocationPoint, MovementState};

/// Everything the validator looks at for one pedometer delta.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    pub step_delta: i64,
    pub activity_type: Option<ActivityType>,
    pub movement_state: Option<MovementState>,
    pub gps_distance_since_start: f64,
    pub gps_speed: Option<f64>,
    pub acceleration: f64,
    pub recent_locations: &'a [LocationPoint],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Pedometer advanced while the user was not going anywhere.
    StationaryWalking,
    /// Travelling faster than a person can walk or run.
    ImplausibleSpeed,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::StationaryWalking => write!(f, "stationary walking"),
            RejectionReason::ImplausibleSpeed => write!(f, "implausible speed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Accepted(u64),
    Rejected(RejectionReason),
}

impl ValidationResult {
    pub fn accepted_steps(self) -> u64 {
        match self {
            ValidationResult::Accepted(n) => n,
            ValidationResult::Rejected(_) => 0,
        }
    }
}

/// Stateless pedometer delta validator.
#[derive(Debug, Clone, Default)]
pub struct StepCountValidator {
    config: ValidatorConfig,
}

impl StepCountValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, input: &ValidationInput<'_>) -> ValidationResult {
        if input.step_delta <= 0 {
            return ValidationResult::Accepted(0);
        }

        let not_ambulating = input.movement_state == Some(MovementState::Stationary)
            || input.activity_type.is_some_and(ActivityType::is_non_ambulatory);
        if not_ambulating
            && self.recent_displacement(input) < self.config.negligible_displacement_m
            && input.acceleration >= self.config.elevated_acceleration
        {
            return ValidationResult::Rejected(RejectionReason::StationaryWalking);
        }

        if let Some(speed) = input.gps_speed {
            if speed > self.config.max_walking_speed_mps
                && input.step_delta >= self.config.large_step_delta
            {
                return ValidationResult::Rejected(RejectionReason::ImplausibleSpeed);
            }
        }

        ValidationResult::Accepted(input.step_delta as u64)
    }

    /// Straight-line displacement across the recent fixes, falling back to the
    /// session's GPS distance when there are not enough of them.
    fn recent_displacement(&self, input: &ValidationInput<'_>) -> f64 {
        match input.recent_locations {
            [first, .., last] => haversine_m(first, last),
            _ => input.gps_distance_since_start,
        }
    }
}
