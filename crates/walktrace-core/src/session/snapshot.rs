//! Read-only views of a session handed to presentation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ActivityType, EmotionType, LocationPoint, MovementState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivePhase {
    Walking,
    Paused,
}

/// Session lifecycle.
///
/// ```text
/// Idle -> EmotionSelection -> Active(Walking) <-> Active(Paused) -> Completed
///   \________________________/        \______________________/
///                                          any sensor failure -> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    EmotionSelection,
    Active(ActivePhase),
    Completed,
    Error,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Active(_))
    }

    pub fn is_walking(self) -> bool {
        self == SessionState::Active(ActivePhase::Walking)
    }

    pub fn is_paused(self) -> bool {
        self == SessionState::Active(ActivePhase::Paused)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::EmotionSelection => "selecting emotions",
            SessionState::Active(ActivePhase::Walking) => "walking",
            SessionState::Active(ActivePhase::Paused) => "paused",
            SessionState::Completed => "completed",
            SessionState::Error => "in error",
        };
        f.write_str(name)
    }
}

/// Diagnostic values behind the displayed numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub acceleration: f64,
    pub steps_per_second: f64,
    pub average_step_length: Option<f64>,
    pub real_step_count: u64,
    pub interpolated_step_count: u64,
    pub gps_distance_m: f64,
    pub step_distance_m: f64,
    pub location_point_count: usize,
    pub last_location: Option<LocationPoint>,
    pub location_gap: bool,
}

/// Display-ready state of the current (or last) session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkingSnapshot {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    /// Interpolated count for display.
    pub step_count: u64,
    /// Authoritative count of accepted steps.
    pub validated_step_count: u64,
    pub duration_ms: u64,
    pub distance_m: f64,
    pub speed_mps: Option<f64>,
    pub current_activity: Option<ActivityType>,
    pub movement_state: Option<MovementState>,
    pub emotions: Vec<EmotionType>,
    pub error: Option<String>,
    pub debug: DebugInfo,
    pub at: DateTime<Utc>,
}

impl WalkingSnapshot {
    /// `mm:ss` or `h:mm:ss` elapsed time.
    pub fn formatted_duration(&self) -> String {
        let total_secs = self.duration_ms / 1000;
        let (h, m, s) = (total_secs / 3600, (total_secs / 60) % 60, total_secs % 60);
        if h > 0 {
            format!("{h}:{m:02}:{s:02}")
        } else {
            format!("{m:02}:{s:02}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_with_phase() {
        let json = serde_json::to_string(&SessionState::Active(ActivePhase::Paused)).unwrap();
        assert_eq!(json, r#"{"state":"active","phase":"paused"}"#);
        let idle = serde_json::to_string(&SessionState::Idle).unwrap();
        assert_eq!(idle, r#"{"state":"idle"}"#);
    }

    #[test]
    fn duration_formatting() {
        let mut snap = WalkingSnapshot {
            state: SessionState::Idle,
            session_id: None,
            step_count: 0,
            validated_step_count: 0,
            duration_ms: 65_000,
            distance_m: 0.0,
            speed_mps: None,
            current_activity: None,
            movement_state: None,
            emotions: Vec::new(),
            error: None,
            debug: DebugInfo::default(),
            at: Utc::now(),
        };
        assert_eq!(snap.formatted_duration(), "01:05");
        snap.duration_ms = 3_725_000;
        assert_eq!(snap.formatted_duration(), "1:02:05");
    }
}
