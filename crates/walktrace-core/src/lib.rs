//! # Walktrace Core Library
//!
//! Sensor-fusion engine for tracking a single walking session. Raw readings
//! from a pedometer, an accelerometer, activity recognition and location
//! updates are combined into one stable, display-ready view: a validated step
//! count, a smoothed step count for display, a calibrated distance, elapsed
//! time with pause support, and a per-activity breakdown.
//!
//! ## Architecture
//!
//! - **Fusion components**: small synchronous state machines, each fed with
//!   explicit timestamps so they can be replayed deterministically
//!   ([`MovementStateStabilizer`], [`StepCountValidator`], [`StepEstimator`],
//!   [`DistanceCalculator`])
//! - **Session**: [`SessionOrchestrator`] drives the components through the
//!   session lifecycle; [`SessionService`] owns one orchestrator on a tokio
//!   task and serializes commands and sensor readings through a channel
//! - **Boundaries**: [`SensorSuite`] controls the platform sensors and
//!   [`SessionStore`] receives completed sessions
//! - **Config**: TOML-backed tuning constants, see [`Config`]

pub mod config;
pub mod distance;
pub mod error;
pub mod estimator;
pub mod events;
pub mod movement;
pub mod sensors;
pub mod session;
pub mod store;
pub mod types;
pub mod validator;

pub use config::Config;
pub use distance::{haversine_m, DistanceCalculator};
pub use error::{ConfigError, CoreError, PersistenceError, Result};
pub use estimator::StepEstimator;
pub use events::Event;
pub use movement::MovementStateStabilizer;
pub use sensors::{
    AccelerometerSample, ActivityUpdate, SensorAvailability, SensorEvent, SensorKind,
    SensorSuite, StaticSensors,
};
pub use session::{
    ActivePhase, DebugInfo, SensorSender, SessionHandle, SessionOrchestrator, SessionService,
    SessionState, WalkingSnapshot,
};
pub use store::{MemorySessionStore, SessionStore};
pub use types::{
    format_distance, ActivityInterval, ActivityType, Emotion, EmotionType, LocationPoint,
    MovementState, WalkingSession,
};
pub use validator::{RejectionReason, StepCountValidator, ValidationInput, ValidationResult};
