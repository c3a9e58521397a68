//! Single-writer session service.
//!
//! One tokio task owns the [`SessionOrchestrator`]. Commands from the UI and
//! readings from the sensor callbacks are funnelled through an unbounded
//! channel, so every mutation is serialized and a snapshot can never observe a
//! half-applied update. A one-second interval drives refreshes and location
//! gap detection while a session is active.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::orchestrator::SessionOrchestrator;
use super::snapshot::WalkingSnapshot;
use super::{now_ms, stamp};
use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::sensors::{
    AccelerometerSample, ActivityUpdate, SensorEvent, SensorKind, SensorSuite,
};
use crate::store::SessionStore;
use crate::types::{EmotionType, LocationPoint, WalkingSession};

enum Command {
    BeginEmotionSelection(oneshot::Sender<Result<Event>>),
    ToggleEmotion(EmotionType, oneshot::Sender<Result<Event>>),
    Start(oneshot::Sender<Result<Event>>),
    Pause(oneshot::Sender<Result<Event>>),
    Resume(oneshot::Sender<Result<Event>>),
    Stop(oneshot::Sender<Result<WalkingSession>>),
    Reset(oneshot::Sender<Event>),
    Snapshot(oneshot::Sender<WalkingSnapshot>),
    Session(oneshot::Sender<Option<WalkingSession>>),
    Sensor(SensorEvent),
}

/// Worker state. Lives on the spawned task only.
pub struct SessionService<S: SensorSuite> {
    orchestrator: SessionOrchestrator,
    sensors: S,
    store: Arc<dyn SessionStore>,
    events: Option<mpsc::UnboundedSender<Event>>,
}

impl<S: SensorSuite + 'static> SessionService<S> {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// The worker exits once every [`SessionHandle`] and [`SensorSender`] is
    /// dropped. `events`, when given, receives every event the session emits.
    pub fn spawn(
        config: Config,
        sensors: S,
        store: Arc<dyn SessionStore>,
        events: Option<mpsc::UnboundedSender<Event>>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let refresh = Duration::from_millis(config.session.refresh_interval_ms.max(1));
        let service = Self {
            orchestrator: SessionOrchestrator::new(config),
            sensors,
            store,
            events,
        };
        let task = tokio::spawn(service.run(rx, refresh));
        (SessionHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, refresh: Duration) {
        let mut ticker = interval(refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                _ = ticker.tick() => self.tick(),
            }
        }

        if self.orchestrator.is_subscribed() {
            self.sensors.stop_tracking();
        }
        debug!("session service stopped");
    }

    fn apply(&mut self, command: Command) {
        let was_subscribed = self.orchestrator.is_subscribed();
        let now = now_ms();

        match command {
            Command::BeginEmotionSelection(reply) => {
                let result = self.orchestrator.begin_emotion_selection(now);
                let _ = reply.send(self.emit_result(result));
            }
            Command::ToggleEmotion(emotion, reply) => {
                let result = self.orchestrator.toggle_emotion(emotion, now);
                let _ = reply.send(self.emit_result(result));
            }
            Command::Start(reply) => {
                let availability = self.sensors.availability();
                let result = self.orchestrator.start(availability, now);
                if let Err(CoreError::SensorUnavailable { sensor }) = &result {
                    self.emit(Event::SessionFailed {
                        sensor: *sensor,
                        reason: format!("{sensor} sensor is not available"),
                        at: stamp(now),
                    });
                }
                let _ = reply.send(self.emit_result(result));
            }
            Command::Pause(reply) => {
                let result = self.orchestrator.pause(now);
                let _ = reply.send(self.emit_result(result));
            }
            Command::Resume(reply) => {
                let result = self.orchestrator.resume(now);
                let _ = reply.send(self.emit_result(result));
            }
            Command::Stop(reply) => {
                let result = self.stop(now);
                let _ = reply.send(result);
            }
            Command::Reset(reply) => {
                let event = self.orchestrator.reset(now);
                self.emit(event.clone());
                let _ = reply.send(event);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.orchestrator.snapshot());
            }
            Command::Session(reply) => {
                let _ = reply.send(self.orchestrator.session());
            }
            Command::Sensor(event) => {
                if let Some(event) = self.orchestrator.handle(event, now) {
                    self.emit(event);
                }
            }
        }

        self.sync_subscription(was_subscribed);
    }

    fn stop(&mut self, now: u64) -> Result<WalkingSession> {
        let (session, event) = self.orchestrator.stop(now)?;
        self.emit(event);

        if let Err(e) = self.store.save(&session) {
            error!(session_id = %session.id, error = %e, "failed to persist walking session");
            self.emit(Event::PersistenceFailed {
                session_id: session.id,
                message: e.to_string(),
                at: stamp(now),
            });
            return Err(e.into());
        }
        info!(session_id = %session.id, "walking session saved");
        Ok(session)
    }

    fn tick(&mut self) {
        if !self.orchestrator.state().is_active() {
            return;
        }
        if let Some(event) = self.orchestrator.tick(now_ms()) {
            self.emit(event);
        }
        self.emit(Event::StateSnapshot {
            snapshot: self.orchestrator.snapshot(),
        });
    }

    /// Start or stop the platform sensors when the subscription flips.
    fn sync_subscription(&mut self, was_subscribed: bool) {
        match (was_subscribed, self.orchestrator.is_subscribed()) {
            (false, true) => self.sensors.start_tracking(),
            (true, false) => self.sensors.stop_tracking(),
            _ => {}
        }
    }

    fn emit_result(&mut self, result: Result<Event>) -> Result<Event> {
        if let Ok(event) = &result {
            self.emit(event.clone());
        }
        result
    }

    fn emit(&mut self, event: Event) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("event listener dropped");
                self.events = None;
            }
        }
    }
}

/// Cloneable command surface for the UI.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| CoreError::ServiceClosed)?;
        rx.await.map_err(|_| CoreError::ServiceClosed)
    }

    pub async fn begin_emotion_selection(&self) -> Result<Event> {
        self.request(Command::BeginEmotionSelection).await?
    }

    pub async fn toggle_emotion(&self, emotion: EmotionType) -> Result<Event> {
        self.request(|reply| Command::ToggleEmotion(emotion, reply))
            .await?
    }

    pub async fn start(&self) -> Result<Event> {
        self.request(Command::Start).await?
    }

    pub async fn pause(&self) -> Result<Event> {
        self.request(Command::Pause).await?
    }

    pub async fn resume(&self) -> Result<Event> {
        self.request(Command::Resume).await?
    }

    /// Stop tracking and persist. The session is completed even when saving
    /// fails; the persistence error is returned after the fact.
    pub async fn stop(&self) -> Result<WalkingSession> {
        self.request(Command::Stop).await?
    }

    pub async fn reset(&self) -> Result<Event> {
        self.request(Command::Reset).await
    }

    pub async fn snapshot(&self) -> Result<WalkingSnapshot> {
        self.request(Command::Snapshot).await
    }

    pub async fn session(&self) -> Result<Option<WalkingSession>> {
        self.request(Command::Session).await
    }

    /// Sender for platform sensor callbacks.
    pub fn sensors(&self) -> SensorSender {
        SensorSender {
            tx: self.tx.clone(),
        }
    }
}

/// Cloneable, non-blocking entry point for sensor callbacks.
#[derive(Debug, Clone)]
pub struct SensorSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl SensorSender {
    pub fn send(&self, event: SensorEvent) -> Result<()> {
        self.tx
            .send(Command::Sensor(event))
            .map_err(|_| CoreError::ServiceClosed)
    }

    pub fn pedometer(&self, steps: u64) -> Result<()> {
        self.send(SensorEvent::Pedometer { steps })
    }

    pub fn accelerometer(&self, sample: AccelerometerSample) -> Result<()> {
        self.send(SensorEvent::Accelerometer(sample))
    }

    pub fn activity(&self, update: ActivityUpdate) -> Result<()> {
        self.send(SensorEvent::Activity(update))
    }

    pub fn locations(&self, points: Vec<LocationPoint>) -> Result<()> {
        self.send(SensorEvent::Locations { points })
    }

    pub fn failure(&self, sensor: SensorKind, message: impl Into<String>) -> Result<()> {
        self.send(SensorEvent::Failure {
            sensor,
            message: message.into(),
        })
    }
}
