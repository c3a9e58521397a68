//! Contracts with the platform sensor collaborators.
//!
//! The drivers themselves live outside this crate. They push readings into a
//! session through [`crate::session::SensorSender`] and expose availability
//! and subscription control through [`SensorSuite`].

use serde::{Deserialize, Serialize};

use crate::types::{ActivityType, LocationPoint, MovementState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Pedometer,
    Accelerometer,
    ActivityRecognition,
    Location,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SensorKind::Pedometer => "pedometer",
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::ActivityRecognition => "activity recognition",
            SensorKind::Location => "location",
        };
        f.write_str(name)
    }
}

/// Which collaborators the device can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorAvailability {
    pub pedometer: bool,
    pub accelerometer: bool,
    pub activity_recognition: bool,
    pub location: bool,
}

impl SensorAvailability {
    pub fn all() -> Self {
        Self {
            pedometer: true,
            accelerometer: true,
            activity_recognition: true,
            location: true,
        }
    }

    /// First sensor tracking cannot run without.
    pub fn missing_required(&self) -> Option<SensorKind> {
        if !self.pedometer {
            Some(SensorKind::Pedometer)
        } else if !self.accelerometer {
            Some(SensorKind::Accelerometer)
        } else {
            None
        }
    }

    /// Sensors that are missing but only degrade tracking.
    pub fn missing_optional(&self) -> Vec<SensorKind> {
        let mut missing = Vec::new();
        if !self.activity_recognition {
            missing.push(SensorKind::ActivityRecognition);
        }
        if !self.location {
            missing.push(SensorKind::Location);
        }
        missing
    }
}

impl Default for SensorAvailability {
    fn default() -> Self {
        Self::all()
    }
}

/// One accelerometer reading with the driver's raw motion classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelerometerSample {
    pub movement: MovementState,
    /// Linear acceleration magnitude with gravity removed, m/s².
    pub acceleration: f64,
    pub timestamp_ms: u64,
}

/// Activity classifier output, delivered on change only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityUpdate {
    pub activity: ActivityType,
    /// 0..=100
    pub confidence: u8,
}

/// Everything a sensor collaborator can push into a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorEvent {
    /// Cumulative step count since boot or the last counter reset.
    Pedometer { steps: u64 },
    Accelerometer(AccelerometerSample),
    Activity(ActivityUpdate),
    Locations { points: Vec<LocationPoint> },
    /// The sensor stopped and will not recover.
    Failure { sensor: SensorKind, message: String },
}

/// Subscription control over the platform sensors.
///
/// `start_tracking` is called when a session starts and `stop_tracking`
/// exactly once when it stops, resets or fails.
pub trait SensorSuite: Send {
    fn availability(&self) -> SensorAvailability;

    fn start_tracking(&mut self);

    fn stop_tracking(&mut self);
}

/// Sensor suite for replays and tests: fixed availability, no hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSensors {
    availability: SensorAvailability,
}

impl StaticSensors {
    pub fn new(availability: SensorAvailability) -> Self {
        Self { availability }
    }
}

impl SensorSuite for StaticSensors {
    fn availability(&self) -> SensorAvailability {
        self.availability
    }

    fn start_tracking(&mut self) {}

    fn stop_tracking(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pedometer_is_checked_before_accelerometer() {
        let none = SensorAvailability {
            pedometer: false,
            accelerometer: false,
            activity_recognition: true,
            location: true,
        };
        assert_eq!(none.missing_required(), Some(SensorKind::Pedometer));
        let no_accel = SensorAvailability {
            pedometer: true,
            ..none
        };
        assert_eq!(no_accel.missing_required(), Some(SensorKind::Accelerometer));
        assert_eq!(SensorAvailability::all().missing_required(), None);
    }

    #[test]
    fn optional_sensors_are_reported_separately() {
        let indoor = SensorAvailability {
            location: false,
            activity_recognition: false,
            ..SensorAvailability::all()
        };
        assert_eq!(indoor.missing_required(), None);
        assert_eq!(
            indoor.missing_optional(),
            vec![SensorKind::ActivityRecognition, SensorKind::Location]
        );
    }

    #[test]
    fn sensor_event_json_is_tagged() {
        let event = SensorEvent::Pedometer { steps: 42 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"kind":"pedometer","steps":42}"#);

        let parsed: SensorEvent = serde_json::from_str(
            r#"{"kind":"accelerometer","movement":"walking","acceleration":1.5,"timestamp_ms":9}"#,
        )
        .unwrap();
        assert!(matches!(parsed, SensorEvent::Accelerometer(s) if s.timestamp_ms == 9));
    }
}
