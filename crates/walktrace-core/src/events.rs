use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sensors::SensorKind;
use crate::session::{SessionState, WalkingSnapshot};
use crate::types::{ActivityType, EmotionType};
use crate::validator::RejectionReason;

/// Every state change of a walking session produces an Event.
/// The UI gates on them; the persistence layer listens for completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    EmotionSelectionStarted {
        at: DateTime<Utc>,
    },
    EmotionToggled {
        emotion: EmotionType,
        selected: bool,
        at: DateTime<Utc>,
    },
    SessionStarted {
        session_id: Uuid,
        emotions: Vec<EmotionType>,
        at: DateTime<Utc>,
    },
    SessionPaused {
        elapsed_ms: u64,
        step_count: u64,
        at: DateTime<Utc>,
    },
    SessionResumed {
        elapsed_ms: u64,
        /// Steps ticked during the pause and excluded from the count.
        excluded_steps: u64,
        at: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: Uuid,
        step_count: u64,
        distance_m: f64,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    SessionFailed {
        sensor: SensorKind,
        reason: String,
        at: DateTime<Utc>,
    },
    SessionReset {
        at: DateTime<Utc>,
    },
    /// Activity classification changed; consumers attributing distance by
    /// activity should switch to the new type.
    ActivityChanged {
        previous: Option<ActivityType>,
        activity: ActivityType,
        confidence: u8,
        at: DateTime<Utc>,
    },
    StepRejected {
        reason: RejectionReason,
        step_delta: u64,
        at: DateTime<Utc>,
    },
    LocationGap {
        since_last_fix_ms: u64,
        at: DateTime<Utc>,
    },
    PersistenceFailed {
        session_id: Uuid,
        message: String,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        snapshot: WalkingSnapshot,
    },
}

impl Event {
    /// Whether the event reflects a state-machine transition.
    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            Event::EmotionSelectionStarted { .. }
                | Event::SessionStarted { .. }
                | Event::SessionPaused { .. }
                | Event::SessionResumed { .. }
                | Event::SessionCompleted { .. }
                | Event::SessionFailed { .. }
                | Event::SessionReset { .. }
        )
    }

    /// State the session is in after this event, for transition events.
    pub fn resulting_state(&self) -> Option<SessionState> {
        use crate::session::ActivePhase;
        match self {
            Event::EmotionSelectionStarted { .. } => Some(SessionState::EmotionSelection),
            Event::SessionStarted { .. } | Event::SessionResumed { .. } => {
                Some(SessionState::Active(ActivePhase::Walking))
            }
            Event::SessionPaused { .. } => Some(SessionState::Active(ActivePhase::Paused)),
            Event::SessionCompleted { .. } => Some(SessionState::Completed),
            Event::SessionFailed { .. } => Some(SessionState::Error),
            Event::SessionReset { .. } => Some(SessionState::Idle),
            _ => None,
        }
    }
}
