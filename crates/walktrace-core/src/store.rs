//! Hand-off point for completed sessions.

use std::sync::Mutex;

use crate::error::PersistenceError;
use crate::types::WalkingSession;

/// Receives every frozen session exactly once, when tracking stops.
///
/// Implementations live with the application's persistence layer. A failed
/// save never rolls back the completed session.
pub trait SessionStore: Send + Sync {
    fn save(&self, session: &WalkingSession) -> Result<(), PersistenceError>;
}

/// In-memory store, for tools and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<Vec<WalkingSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<WalkingSession> {
        self.sessions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &WalkingSession) -> Result<(), PersistenceError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        sessions.push(session.clone());
        Ok(())
    }
}
