//! Domain types shared by every component.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Fix time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl LocationPoint {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms,
        }
    }

    /// Same fix reported twice: equal timestamp, or coordinates within 1e-6°.
    pub fn is_duplicate_of(&self, other: &LocationPoint) -> bool {
        const COORD_EPSILON: f64 = 0.000_001;
        self.timestamp_ms == other.timestamp_ms
            || ((self.latitude - other.latitude).abs() < COORD_EPSILON
                && (self.longitude - other.longitude).abs() < COORD_EPSILON)
    }
}

/// Debounced motion state produced by the stabilizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementState {
    Stationary,
    Walking,
    Running,
}

impl MovementState {
    pub fn is_moving(self) -> bool {
        matches!(self, MovementState::Walking | MovementState::Running)
    }
}

/// Coarse classification from the platform activity recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Still,
    Walking,
    Running,
    OnFoot,
    OnBicycle,
    InVehicle,
    Tilting,
    Unknown,
}

impl ActivityType {
    /// Activities during which the pedometer should not be advancing.
    pub fn is_non_ambulatory(self) -> bool {
        matches!(
            self,
            ActivityType::Still | ActivityType::OnBicycle | ActivityType::InVehicle
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ActivityType::Still => "still",
            ActivityType::Walking => "walking",
            ActivityType::Running => "running",
            ActivityType::OnFoot => "on foot",
            ActivityType::OnBicycle => "cycling",
            ActivityType::InVehicle => "in vehicle",
            ActivityType::Tilting => "tilting",
            ActivityType::Unknown => "unknown",
        }
    }
}

/// Accumulated time and distance for one activity type within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInterval {
    pub activity: ActivityType,
    pub duration_ms: u64,
    pub distance_m: f64,
}

/// Pre-walk mood tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionType {
    Happy,
    Joyful,
    Content,
    Depressed,
    Tired,
    Anxious,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emotion {
    pub emotion: EmotionType,
    pub timestamp_ms: u64,
}

/// Aggregate root for one walk.
///
/// Only the session orchestrator mutates it, and only while the session is
/// active. Once `end_time_ms` is set the record is frozen and every reader
/// works on a clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkingSession {
    pub id: Uuid,
    pub start_time_ms: u64,
    #[serde(default)]
    pub end_time_ms: Option<u64>,
    pub step_count: u64,
    pub total_distance_m: f64,
    /// Active (non-paused) time in milliseconds.
    pub duration_ms: u64,
    #[serde(default)]
    pub locations: Vec<LocationPoint>,
    #[serde(default)]
    pub activity_intervals: Vec<ActivityInterval>,
    #[serde(default)]
    pub primary_activity: Option<ActivityType>,
    #[serde(default)]
    pub emotions: Vec<Emotion>,
}

impl WalkingSession {
    pub fn new(start_time_ms: u64, emotions: Vec<Emotion>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time_ms,
            end_time_ms: None,
            step_count: 0,
            total_distance_m: 0.0,
            duration_ms: 0,
            locations: Vec::new(),
            activity_intervals: Vec::new(),
            primary_activity: None,
            emotions,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.end_time_ms.is_some()
    }

    pub fn formatted_distance(&self) -> String {
        format_distance(self.total_distance_m)
    }
}

/// Human readable distance: meters below 1 km, kilometers above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_by_timestamp_or_coordinates() {
        let a = LocationPoint::new(37.5, 127.0, 1_000);
        assert!(a.is_duplicate_of(&LocationPoint::new(37.6, 127.1, 1_000)));
        assert!(a.is_duplicate_of(&LocationPoint::new(37.500_000_5, 127.000_000_5, 2_000)));
        assert!(!a.is_duplicate_of(&LocationPoint::new(37.500_1, 127.0, 2_000)));
    }

    #[test]
    fn ambulatory_classification() {
        assert!(ActivityType::InVehicle.is_non_ambulatory());
        assert!(ActivityType::Still.is_non_ambulatory());
        assert!(!ActivityType::OnFoot.is_non_ambulatory());
        assert!(!ActivityType::Unknown.is_non_ambulatory());
        assert_eq!(ActivityType::InVehicle.label(), "in vehicle");
    }

    #[test]
    fn formatted_distance_switches_units() {
        let mut session = WalkingSession::new(0, Vec::new());
        session.total_distance_m = 842.4;
        assert_eq!(session.formatted_distance(), "842 m");
        session.total_distance_m = 1523.0;
        assert_eq!(session.formatted_distance(), "1.52 km");
    }

    #[test]
    fn session_json_roundtrip_keeps_optional_fields() {
        let mut session = WalkingSession::new(10, vec![Emotion {
            emotion: EmotionType::Content,
            timestamp_ms: 10,
        }]);
        session.end_time_ms = Some(70_010);
        session.primary_activity = Some(ActivityType::Walking);
        let json = serde_json::to_string(&session).unwrap();
        let parsed: WalkingSession = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, session);
        assert!(parsed.is_frozen());
    }
}
