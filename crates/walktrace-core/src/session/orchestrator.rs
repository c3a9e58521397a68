//! Session orchestrator.
//!
//! Owns one walking session from start to stop and drives the four fusion
//! components from incoming sensor events. Like the rest of the crate it has
//! no threads of its own: every method takes the receipt time `now_ms` and the
//! caller (normally [`super::SessionService`]) serializes all calls.
//!
//! ## Step accounting
//!
//! ```text
//! relative  = raw pedometer reading - session baseline
//! effective = relative - step_offset          (pause exclusion)
//! delta     = effective - last_effective      (validated, then counted)
//! ```
//!
//! Readings arriving while paused only move `last_raw_step_count`; on resume
//! the drift since `paused_step_base` is added to `step_offset`, so those steps
//! never reach `delta`.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::snapshot::{ActivePhase, DebugInfo, SessionState, WalkingSnapshot};
use super::stamp;
use crate::config::Config;
use crate::distance::DistanceCalculator;
use crate::error::{CoreError, Result};
use crate::estimator::StepEstimator;
use crate::events::Event;
use crate::movement::MovementStateStabilizer;
use crate::sensors::{AccelerometerSample, ActivityUpdate, SensorAvailability, SensorEvent, SensorKind};
use crate::types::{
    ActivityInterval, Emotion, EmotionType, LocationPoint, MovementState, WalkingSession,
};
use crate::validator::{StepCountValidator, ValidationInput, ValidationResult};

#[derive(Debug, Clone)]
pub struct SessionOrchestrator {
    config: Config,
    stabilizer: MovementStateStabilizer,
    validator: StepCountValidator,
    estimator: StepEstimator,
    distance: DistanceCalculator,

    state: SessionState,
    error: Option<String>,
    /// Whether sensor readings are currently consumed.
    subscribed: bool,
    selected_emotions: BTreeSet<EmotionType>,
    session: Option<WalkingSession>,
    updated_at_ms: u64,

    // Pedometer
    raw_baseline: Option<u64>,
    raw_carry: u64,
    last_raw_reading: u64,
    last_raw_step_count: u64,
    last_effective: u64,
    display_step_count: u64,

    // Pause accounting
    interval_start_ms: u64,
    elapsed_before_pause: u64,
    step_offset: u64,
    paused_step_base: u64,

    // Motion and activity
    movement: Option<MovementState>,
    last_acceleration: f64,
    current_activity: Option<ActivityUpdate>,
    activity_since_ms: Option<u64>,
    location_available: bool,

    // Location
    gps_distance_m: f64,
    speed_mps: Option<f64>,
    gap_clock_ms: u64,
    location_gap: bool,
}

impl SessionOrchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            stabilizer: MovementStateStabilizer::new(config.stabilizer.clone()),
            validator: StepCountValidator::new(config.validator.clone()),
            estimator: StepEstimator::new(config.estimator.clone()),
            distance: DistanceCalculator::new(config.distance.clone()),
            config,
            state: SessionState::Idle,
            error: None,
            subscribed: false,
            selected_emotions: BTreeSet::new(),
            session: None,
            updated_at_ms: 0,
            raw_baseline: None,
            raw_carry: 0,
            last_raw_reading: 0,
            last_raw_step_count: 0,
            last_effective: 0,
            display_step_count: 0,
            interval_start_ms: 0,
            elapsed_before_pause: 0,
            step_offset: 0,
            paused_step_base: 0,
            movement: None,
            last_acceleration: 0.0,
            current_activity: None,
            activity_since_ms: None,
            location_available: true,
            gps_distance_m: 0.0,
            speed_mps: None,
            gap_clock_ms: 0,
            location_gap: false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn selected_emotions(&self) -> Vec<EmotionType> {
        self.selected_emotions.iter().copied().collect()
    }

    /// Authoritative (validated) step count.
    pub fn step_count(&self) -> u64 {
        self.session.as_ref().map(|s| s.step_count).unwrap_or(0)
    }

    pub fn step_offset(&self) -> u64 {
        self.step_offset
    }

    pub fn elapsed_before_pause(&self) -> u64 {
        self.elapsed_before_pause
    }

    pub fn movement_state(&self) -> Option<MovementState> {
        self.movement
    }

    pub fn average_step_length(&self) -> Option<f64> {
        self.distance.average_step_length()
    }

    /// Copy of the current or last completed session.
    pub fn session(&self) -> Option<WalkingSession> {
        self.session.clone()
    }

    /// Display-ready view as of the last update.
    pub fn snapshot(&self) -> WalkingSnapshot {
        let session = self.session.as_ref();
        let locations = session.map(|s| s.locations.as_slice()).unwrap_or(&[]);
        let validated = self.step_count();
        WalkingSnapshot {
            state: self.state,
            session_id: session.map(|s| s.id),
            step_count: self.display_step_count,
            validated_step_count: validated,
            duration_ms: session.map(|s| s.duration_ms).unwrap_or(0),
            distance_m: session.map(|s| s.total_distance_m).unwrap_or(0.0),
            speed_mps: self.speed_mps,
            current_activity: self.current_activity.map(|a| a.activity),
            movement_state: self.movement,
            emotions: self.selected_emotions(),
            error: self.error.clone(),
            debug: DebugInfo {
                acceleration: self.last_acceleration,
                steps_per_second: self.estimator.estimated_steps_per_second(),
                average_step_length: self.distance.average_step_length(),
                real_step_count: validated,
                interpolated_step_count: self.display_step_count,
                gps_distance_m: self.gps_distance_m,
                step_distance_m: validated as f64 * self.distance.step_length(),
                location_point_count: locations.len(),
                last_location: locations.last().copied(),
                location_gap: self.location_gap,
            },
            at: stamp(self.updated_at_ms),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn begin_emotion_selection(&mut self, now_ms: u64) -> Result<Event> {
        match self.state {
            SessionState::Idle | SessionState::Completed | SessionState::EmotionSelection => {
                self.state = SessionState::EmotionSelection;
                self.updated_at_ms = now_ms;
                Ok(Event::EmotionSelectionStarted { at: stamp(now_ms) })
            }
            state => Err(CoreError::InvalidTransition {
                state,
                action: "select emotions",
            }),
        }
    }

    /// Add or remove a pre-walk emotion tag.
    pub fn toggle_emotion(&mut self, emotion: EmotionType, now_ms: u64) -> Result<Event> {
        if !matches!(
            self.state,
            SessionState::Idle | SessionState::EmotionSelection
        ) {
            return Err(CoreError::InvalidTransition {
                state: self.state,
                action: "select emotions",
            });
        }
        let selected = if self.selected_emotions.remove(&emotion) {
            false
        } else {
            self.selected_emotions.insert(emotion);
            true
        };
        self.state = SessionState::EmotionSelection;
        self.updated_at_ms = now_ms;
        Ok(Event::EmotionToggled {
            emotion,
            selected,
            at: stamp(now_ms),
        })
    }

    pub fn start(&mut self, availability: SensorAvailability, now_ms: u64) -> Result<Event> {
        if self.state.is_active() {
            return Err(CoreError::InvalidTransition {
                state: self.state,
                action: "start",
            });
        }

        if let Some(sensor) = availability.missing_required() {
            warn!(%sensor, "cannot start walking session");
            self.enter_error(format!("{sensor} sensor is not available"), now_ms);
            return Err(CoreError::SensorUnavailable { sensor });
        }
        for sensor in availability.missing_optional() {
            warn!(%sensor, "sensor unavailable, tracking continues without it");
        }

        let emotions = std::mem::take(&mut self.selected_emotions);
        *self = Self::new(self.config.clone());
        self.selected_emotions = emotions;
        self.location_available = availability.location;

        let emotions = self
            .selected_emotions
            .iter()
            .map(|&emotion| Emotion {
                emotion,
                timestamp_ms: now_ms,
            })
            .collect();
        let session = WalkingSession::new(now_ms, emotions);
        let session_id = session.id;
        self.session = Some(session);

        self.interval_start_ms = now_ms;
        self.gap_clock_ms = now_ms;
        self.estimator.on_real_step_updated(0, now_ms);
        self.distance.initialize(0);
        self.subscribed = true;
        self.state = SessionState::Active(ActivePhase::Walking);
        self.recompute_distance();
        self.refresh(now_ms);

        info!(%session_id, "walking session started");
        Ok(Event::SessionStarted {
            session_id,
            emotions: self.selected_emotions(),
            at: stamp(now_ms),
        })
    }

    pub fn pause(&mut self, now_ms: u64) -> Result<Event> {
        if !self.state.is_walking() {
            return Err(CoreError::InvalidTransition {
                state: self.state,
                action: "pause",
            });
        }
        self.refresh(now_ms);
        self.elapsed_before_pause = self.current_duration(now_ms);
        self.paused_step_base = self.last_raw_step_count;
        self.close_activity_interval(now_ms);
        self.distance.discard_window();
        self.state = SessionState::Active(ActivePhase::Paused);
        self.updated_at_ms = now_ms;

        info!(elapsed_ms = self.elapsed_before_pause, "walking session paused");
        Ok(Event::SessionPaused {
            elapsed_ms: self.elapsed_before_pause,
            step_count: self.step_count(),
            at: stamp(now_ms),
        })
    }

    pub fn resume(&mut self, now_ms: u64) -> Result<Event> {
        if !self.state.is_paused() {
            return Err(CoreError::InvalidTransition {
                state: self.state,
                action: "resume",
            });
        }
        let paused_delta = self
            .last_raw_step_count
            .saturating_sub(self.paused_step_base);
        self.step_offset += paused_delta;
        self.paused_step_base = self.last_raw_step_count;
        self.interval_start_ms = now_ms;
        self.gap_clock_ms = now_ms;
        if self.current_activity.is_some() {
            self.activity_since_ms = Some(now_ms);
        }
        // Motion must settle again, and the first new fix starts a fresh chain.
        self.stabilizer.reset();
        self.movement = None;
        self.distance.set_movement_state(None);
        if let Some(session) = self.session.as_ref() {
            self.distance.break_chain_at(session.locations.len());
        }
        // Interpolation restarts from the real count, not from before the pause.
        self.estimator.on_real_step_updated(self.step_count(), now_ms);
        self.state = SessionState::Active(ActivePhase::Walking);
        self.refresh(now_ms);

        info!(
            elapsed_ms = self.elapsed_before_pause,
            excluded_steps = paused_delta,
            "walking session resumed"
        );
        Ok(Event::SessionResumed {
            elapsed_ms: self.elapsed_before_pause,
            excluded_steps: paused_delta,
            at: stamp(now_ms),
        })
    }

    /// Finish the session and return the frozen record for persistence.
    pub fn stop(&mut self, now_ms: u64) -> Result<(WalkingSession, Event)> {
        if !self.state.is_active() {
            return Err(CoreError::InvalidTransition {
                state: self.state,
                action: "stop",
            });
        }

        let duration_ms = self.current_duration(now_ms);
        if self.state.is_walking() {
            self.close_activity_interval(now_ms);
        }
        self.recompute_distance();

        let last_activity = self.current_activity.map(|a| a.activity);
        let Some(session) = self.session.as_mut() else {
            return Err(CoreError::InvalidTransition {
                state: self.state,
                action: "stop",
            });
        };

        // The whole distance goes to the last observed activity.
        if let Some(activity) = last_activity {
            if !session.locations.is_empty() {
                let total = session.total_distance_m;
                match session
                    .activity_intervals
                    .iter_mut()
                    .find(|i| i.activity == activity)
                {
                    Some(interval) => interval.distance_m += total,
                    None => session.activity_intervals.push(ActivityInterval {
                        activity,
                        duration_ms: 0,
                        distance_m: total,
                    }),
                }
            }
        }
        session.primary_activity = session
            .activity_intervals
            .iter()
            .max_by_key(|i| i.duration_ms)
            .map(|i| i.activity);
        session.duration_ms = duration_ms;
        session.end_time_ms = Some(now_ms);
        let frozen = session.clone();

        self.display_step_count = frozen.step_count;
        self.subscribed = false;
        self.state = SessionState::Completed;
        self.updated_at_ms = now_ms;

        info!(
            session_id = %frozen.id,
            steps = frozen.step_count,
            distance = %frozen.formatted_distance(),
            "walking session completed"
        );
        let event = Event::SessionCompleted {
            session_id: frozen.id,
            step_count: frozen.step_count,
            distance_m: frozen.total_distance_m,
            duration_ms: frozen.duration_ms,
            at: stamp(now_ms),
        };
        Ok((frozen, event))
    }

    /// Drop everything and return to Idle. Valid from any state.
    pub fn reset(&mut self, now_ms: u64) -> Event {
        debug!(state = %self.state, "resetting walking session");
        *self = Self::new(self.config.clone());
        Event::SessionReset { at: stamp(now_ms) }
    }

    /// Unrecoverable sensor failure. Optional sensors only degrade tracking.
    pub fn fail(&mut self, sensor: SensorKind, message: &str, now_ms: u64) -> Option<Event> {
        if !self.subscribed {
            return None;
        }
        match sensor {
            SensorKind::Pedometer | SensorKind::Accelerometer => {
                let reason = format!("{sensor} sensor failed: {message}");
                warn!(%sensor, error = message, "walking session failed");
                self.enter_error(reason.clone(), now_ms);
                Some(Event::SessionFailed {
                    sensor,
                    reason,
                    at: stamp(now_ms),
                })
            }
            SensorKind::Location => {
                warn!(error = message, "location updates stopped");
                self.location_available = false;
                None
            }
            SensorKind::ActivityRecognition => {
                warn!(error = message, "activity recognition stopped");
                None
            }
        }
    }

    /// Periodic refresh; call about once per second.
    pub fn tick(&mut self, now_ms: u64) -> Option<Event> {
        if !self.state.is_walking() {
            return None;
        }
        self.recompute_distance();
        self.refresh(now_ms);

        let since_last_fix = now_ms.saturating_sub(self.gap_clock_ms);
        if self.location_available
            && !self.location_gap
            && since_last_fix >= self.config.session.location_gap_ms
        {
            self.location_gap = true;
            warn!(since_last_fix_ms = since_last_fix, "no location fix, distance relies on steps");
            return Some(Event::LocationGap {
                since_last_fix_ms: since_last_fix,
                at: stamp(now_ms),
            });
        }
        None
    }

    // ── Sensor input ─────────────────────────────────────────────────

    /// Apply one sensor event. Events outside an active session are dropped.
    pub fn handle(&mut self, event: SensorEvent, now_ms: u64) -> Option<Event> {
        match event {
            SensorEvent::Pedometer { steps } => self.on_pedometer(steps, now_ms),
            SensorEvent::Accelerometer(sample) => self.on_accelerometer(sample, now_ms),
            SensorEvent::Activity(update) => self.on_activity(update, now_ms),
            SensorEvent::Locations { points } => self.on_locations(points, now_ms),
            SensorEvent::Failure { sensor, message } => self.fail(sensor, &message, now_ms),
        }
    }

    pub fn on_pedometer(&mut self, raw: u64, now_ms: u64) -> Option<Event> {
        if !self.subscribed {
            return None;
        }
        self.last_raw_step_count = self.relative_steps(raw);
        if self.state.is_paused() {
            return None;
        }

        let effective = self.last_raw_step_count.saturating_sub(self.step_offset);
        let step_delta = effective as i64 - self.last_effective as i64;
        self.last_effective = self.last_effective.max(effective);

        let locations = self
            .session
            .as_ref()
            .map(|s| s.locations.as_slice())
            .unwrap_or(&[]);
        let recent_from = locations
            .len()
            .saturating_sub(self.config.validator.recent_location_count);
        let input = ValidationInput {
            step_delta,
            activity_type: self.current_activity.map(|a| a.activity),
            movement_state: self.movement,
            gps_distance_since_start: self.gps_distance_m,
            gps_speed: self.speed_mps,
            acceleration: self.last_acceleration,
            recent_locations: &locations[recent_from..],
        };

        let result = self.validator.validate(&input);
        let rejected = match result {
            ValidationResult::Accepted(_) => None,
            ValidationResult::Rejected(reason) => {
                warn!(%reason, step_delta, "pedometer delta rejected");
                Some(Event::StepRejected {
                    reason,
                    step_delta: step_delta.max(0) as u64,
                    at: stamp(now_ms),
                })
            }
        };
        if let Some(session) = self.session.as_mut() {
            session.step_count += result.accepted_steps();
        }

        self.estimator.on_real_step_updated(self.step_count(), now_ms);
        self.recompute_distance();
        self.refresh(now_ms);
        debug!(
            raw,
            effective,
            validated = self.step_count(),
            display = self.display_step_count,
            "step count updated"
        );
        rejected
    }

    pub fn on_accelerometer(&mut self, sample: AccelerometerSample, now_ms: u64) -> Option<Event> {
        if !self.subscribed || self.state.is_paused() {
            return None;
        }
        self.last_acceleration = sample.acceleration;
        let stable = self
            .stabilizer
            .observe(sample.movement, sample.acceleration, sample.timestamp_ms);
        if stable != self.movement {
            debug!(from = ?self.movement, to = ?stable, "movement state changed");
            self.movement = stable;
            self.distance.set_movement_state(stable);
        }
        self.estimator.estimate(stable, sample.acceleration, now_ms);
        self.refresh(now_ms);
        None
    }

    pub fn on_activity(&mut self, update: ActivityUpdate, now_ms: u64) -> Option<Event> {
        if !self.subscribed {
            return None;
        }
        let previous = self.current_activity.map(|a| a.activity);
        if previous == Some(update.activity) {
            self.current_activity = Some(update);
            return None;
        }

        if self.state.is_walking() {
            self.close_activity_interval(now_ms);
            self.activity_since_ms = Some(now_ms);
        }
        self.current_activity = Some(update);
        self.updated_at_ms = now_ms;

        debug!(?previous, activity = ?update.activity, confidence = update.confidence, "activity changed");
        Some(Event::ActivityChanged {
            previous,
            activity: update.activity,
            confidence: update.confidence,
            at: stamp(now_ms),
        })
    }

    pub fn on_locations(&mut self, mut points: Vec<LocationPoint>, now_ms: u64) -> Option<Event> {
        if !self.subscribed || self.state.is_paused() {
            return None;
        }
        let Some(session) = self.session.as_mut() else {
            return None;
        };

        points.sort_by_key(|p| p.timestamp_ms);
        let received = points.len();
        let mut appended = 0;
        for point in points {
            if session.locations.iter().any(|p| p.is_duplicate_of(&point)) {
                continue;
            }
            if session
                .locations
                .last()
                .is_some_and(|last| last.timestamp_ms > point.timestamp_ms)
            {
                debug!(timestamp_ms = point.timestamp_ms, "stale location dropped");
                continue;
            }
            session.locations.push(point);
            appended += 1;
        }
        let total = session.locations.len();

        if appended > 0 {
            self.gap_clock_ms = now_ms;
            self.location_gap = false;
            self.location_available = true;
            self.recompute_distance();
            self.refresh(now_ms);
        }
        debug!(received, appended, total, "location batch applied");
        None
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Pedometer reading relative to the first reading of the session.
    fn relative_steps(&mut self, raw: u64) -> u64 {
        match self.raw_baseline {
            None => {
                self.raw_baseline = Some(raw);
            }
            Some(_) if raw < self.last_raw_reading => {
                // Counter restarted (reboot or driver reset): keep counting from zero.
                warn!(raw, previous = self.last_raw_reading, "pedometer counter reset");
                self.raw_carry = self.last_raw_step_count;
                self.raw_baseline = Some(0);
            }
            Some(_) => {}
        }
        self.last_raw_reading = raw;
        let baseline = self.raw_baseline.unwrap_or(raw);
        self.raw_carry + raw.saturating_sub(baseline)
    }

    fn current_duration(&self, now_ms: u64) -> u64 {
        match self.state {
            SessionState::Active(ActivePhase::Walking) => {
                self.elapsed_before_pause + now_ms.saturating_sub(self.interval_start_ms)
            }
            SessionState::Active(ActivePhase::Paused) => self.elapsed_before_pause,
            _ => self.session.as_ref().map(|s| s.duration_ms).unwrap_or(0),
        }
    }

    fn close_activity_interval(&mut self, now_ms: u64) {
        let (Some(current), Some(since)) = (self.current_activity, self.activity_since_ms.take())
        else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let elapsed = now_ms.saturating_sub(since);
        match session
            .activity_intervals
            .iter_mut()
            .find(|i| i.activity == current.activity)
        {
            Some(interval) => interval.duration_ms += elapsed,
            None => session.activity_intervals.push(ActivityInterval {
                activity: current.activity,
                duration_ms: elapsed,
                distance_m: 0.0,
            }),
        }
    }

    fn recompute_distance(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.total_distance_m = self
            .distance
            .calculate_total_distance(&session.locations, session.step_count);
        self.gps_distance_m = self.distance.last_gps_distance();
        self.speed_mps = self.distance.calculate_speed(&session.locations);
    }

    fn refresh(&mut self, now_ms: u64) {
        let duration = self.current_duration(now_ms);
        self.display_step_count = if self.state.is_walking() {
            self.estimator.current(now_ms)
        } else {
            self.step_count()
        };
        if let Some(session) = self.session.as_mut() {
            session.duration_ms = duration;
        }
        self.updated_at_ms = now_ms;
    }

    fn enter_error(&mut self, reason: String, now_ms: u64) {
        self.subscribed = false;
        self.session = None;
        self.state = SessionState::Error;
        self.error = Some(reason);
        self.updated_at_ms = now_ms;
    }
}

impl Default for SessionOrchestrator {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
