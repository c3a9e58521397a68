//! `walktrace replay`: feed a recorded sensor trace through the engine.
//!
//! A trace is JSON lines. Every record carries its receipt time `at_ms` and
//! either a session `command` or a sensor reading tagged by `kind`:
//!
//! ```text
//! {"at_ms": 0, "command": "emotion", "emotion": "happy"}
//! {"at_ms": 0, "command": "start"}
//! {"at_ms": 1000, "kind": "pedometer", "steps": 1204}
//! {"at_ms": 1000, "kind": "accelerometer", "movement": "walking", "acceleration": 1.7, "timestamp_ms": 1000}
//! {"at_ms": 5000, "kind": "locations", "points": [{"latitude": 37.56, "longitude": 126.97, "timestamp_ms": 4800}]}
//! {"at_ms": 60000, "command": "stop"}
//! ```
//!
//! By default the trace is replayed on its own clock, so output is
//! reproducible. `--realtime` instead plays it against the wall clock through
//! the session service, the way a device would.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use serde::Deserialize;
use tokio::sync::mpsc;
use walktrace_core::{
    format_distance, ActivityType, Config, CoreError, EmotionType, Event, MemorySessionStore,
    PersistenceError, SensorAvailability, SensorEvent, SensorKind, SessionOrchestrator,
    SessionService,
    SessionStore, StaticSensors, WalkingSession, WalkingSnapshot,
};

#[derive(Args)]
pub struct ReplayArgs {
    /// Trace file (JSON lines)
    trace: PathBuf,
    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print a snapshot every N seconds of trace time (0 disables)
    #[arg(long, default_value = "10")]
    every: u64,
    /// Emit snapshots, events and the final session as JSON lines
    #[arg(long)]
    json: bool,
    /// Directory to write the completed session to
    #[arg(long)]
    save_dir: Option<PathBuf>,
    /// Play the trace against the wall clock through the session service
    #[arg(long)]
    realtime: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TraceCommand {
    SelectEmotions,
    Emotion {
        emotion: EmotionType,
    },
    Start {
        /// Simulated sensor availability; all sensors when omitted.
        #[serde(default)]
        availability: Option<SensorAvailability>,
    },
    Pause,
    Resume,
    Stop,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TraceEntry {
    Command(TraceCommand),
    Sensor(SensorEvent),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceRecord {
    pub at_ms: u64,
    #[serde(flatten)]
    pub entry: TraceEntry,
}

/// Parse a JSON-lines trace. Blank lines and `#` comments are skipped.
pub fn parse_trace(input: &str) -> Result<Vec<TraceRecord>, String> {
    let mut records: Vec<TraceRecord> = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: TraceRecord =
            serde_json::from_str(line).map_err(|e| format!("line {}: {e}", idx + 1))?;
        if let Some(prev) = records.last() {
            if record.at_ms < prev.at_ms {
                return Err(format!(
                    "line {}: at_ms {} goes back in time (previous {})",
                    idx + 1,
                    record.at_ms,
                    prev.at_ms
                ));
            }
        }
        records.push(record);
    }
    Ok(records)
}

/// Everything a deterministic replay produced.
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub snapshots: Vec<WalkingSnapshot>,
    pub events: Vec<Event>,
    pub session: Option<WalkingSession>,
    /// Required sensor missing at the latest start.
    pub unavailable: Option<SensorKind>,
}

impl ReplayOutcome {
    /// The sensor failure that ended the replay, if any.
    pub fn failure(&self) -> Option<CoreError> {
        if let Some(sensor) = self.unavailable {
            return Some(CoreError::SensorUnavailable { sensor });
        }
        self.events.iter().rev().find_map(|e| match e {
            Event::SessionFailed { sensor, reason, .. } => Some(CoreError::SensorFailed {
                sensor: *sensor,
                message: reason.clone(),
            }),
            _ => None,
        })
    }
}

struct Replayer {
    orchestrator: SessionOrchestrator,
    refresh_ms: u64,
    every_ms: u64,
    next_tick: Option<u64>,
    next_report: u64,
    outcome: ReplayOutcome,
}

impl Replayer {
    fn new(config: Config, every_ms: u64) -> Self {
        Self {
            refresh_ms: config.session.refresh_interval_ms.max(1),
            orchestrator: SessionOrchestrator::new(config),
            every_ms,
            next_tick: None,
            next_report: 0,
            outcome: ReplayOutcome::default(),
        }
    }

    /// Run the periodic refresh for every tick due up to `now`.
    fn advance_to(&mut self, now: u64) {
        while let Some(tick) = self.next_tick.filter(|&t| t <= now) {
            if let Some(event) = self.orchestrator.tick(tick) {
                self.outcome.events.push(event);
            }
            if self.every_ms > 0 && tick >= self.next_report {
                self.outcome.snapshots.push(self.orchestrator.snapshot());
                self.next_report = tick.saturating_add(self.every_ms);
            }
            self.next_tick = Some(tick + self.refresh_ms);
        }
    }

    fn apply(&mut self, record: &TraceRecord) -> Result<(), CoreError> {
        let now = record.at_ms;
        self.advance_to(now);

        let o = &mut self.orchestrator;
        let event = match &record.entry {
            TraceEntry::Sensor(reading) => o.handle(reading.clone(), now),
            TraceEntry::Command(command) => match command {
                TraceCommand::SelectEmotions => Some(o.begin_emotion_selection(now)?),
                TraceCommand::Emotion { emotion } => Some(o.toggle_emotion(*emotion, now)?),
                TraceCommand::Start { availability } => {
                    let availability = availability.unwrap_or_else(SensorAvailability::all);
                    match o.start(availability, now) {
                        Ok(event) => {
                            self.next_tick = Some(now + self.refresh_ms);
                            self.next_report = now.saturating_add(self.every_ms);
                            self.outcome.unavailable = None;
                            Some(event)
                        }
                        Err(CoreError::SensorUnavailable { sensor }) => {
                            self.outcome.unavailable = Some(sensor);
                            Some(Event::SessionFailed {
                                sensor,
                                reason: format!("{sensor} sensor is not available"),
                                at: o.snapshot().at,
                            })
                        }
                        Err(e) => return Err(e),
                    }
                }
                TraceCommand::Pause => Some(o.pause(now)?),
                TraceCommand::Resume => Some(o.resume(now)?),
                TraceCommand::Stop => {
                    let (session, event) = o.stop(now)?;
                    self.outcome.snapshots.push(o.snapshot());
                    self.outcome.session = Some(session);
                    Some(event)
                }
                TraceCommand::Reset => Some(o.reset(now)),
            },
        };
        if let Some(event) = event {
            self.outcome.events.push(event);
        }

        if !self.orchestrator.state().is_active() {
            self.next_tick = None;
        }
        Ok(())
    }
}

/// Replay `records` on the trace's own clock.
pub fn replay(
    records: &[TraceRecord],
    config: Config,
    every_ms: u64,
) -> Result<ReplayOutcome, CoreError> {
    let mut replayer = Replayer::new(config, every_ms);
    for record in records {
        replayer.apply(record)?;
    }
    if replayer.orchestrator.state().is_active() {
        tracing::warn!("trace ended with the session still active");
        replayer
            .outcome
            .snapshots
            .push(replayer.orchestrator.snapshot());
    }
    Ok(replayer.outcome)
}

/// Writes each completed session to `<dir>/<session id>.json`.
struct JsonDirStore {
    dir: PathBuf,
}

impl SessionStore for JsonDirStore {
    fn save(&self, session: &WalkingSession) -> Result<(), PersistenceError> {
        let failed = |message: String| PersistenceError::SaveFailed {
            session_id: session.id.to_string(),
            message,
        };
        std::fs::create_dir_all(&self.dir).map_err(|e| failed(e.to_string()))?;
        let json = serde_json::to_string_pretty(session).map_err(|e| failed(e.to_string()))?;
        let path = self.dir.join(format!("{}.json", session.id));
        std::fs::write(&path, json).map_err(|e| failed(e.to_string()))
    }
}

fn store_for(save_dir: Option<&Path>) -> Arc<dyn SessionStore> {
    match save_dir {
        Some(dir) => Arc::new(JsonDirStore {
            dir: dir.to_path_buf(),
        }),
        None => Arc::new(MemorySessionStore::new()),
    }
}

pub fn run(args: ReplayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default(),
    };
    let input = std::fs::read_to_string(&args.trace)?;
    let records = parse_trace(&input)?;
    let store = store_for(args.save_dir.as_deref());

    if args.realtime {
        return run_realtime(records, config, store, args.json);
    }

    let outcome = replay(&records, config, args.every.saturating_mul(1000))?;
    for snapshot in &outcome.snapshots {
        print_snapshot(snapshot, args.json)?;
    }
    for event in outcome.events.iter().filter(|e| is_notable(e)) {
        print_event(event, args.json)?;
    }
    if let Some(session) = &outcome.session {
        // The session is complete whether or not it can be saved.
        print_session(session, args.json)?;
        store.save(session)?;
    }
    match outcome.failure() {
        Some(failure) => Err(failure.into()),
        None => Ok(()),
    }
}

fn run_realtime(
    records: Vec<TraceRecord>,
    config: Config,
    store: Arc<dyn SessionStore>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let availability = records
        .iter()
        .find_map(|r| match &r.entry {
            TraceEntry::Command(TraceCommand::Start { availability }) => *availability,
            _ => None,
        })
        .unwrap_or_else(SensorAvailability::all);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(drive_service(records, config, availability, store, json))
}

async fn drive_service(
    records: Vec<TraceRecord>,
    config: Config,
    availability: SensorAvailability,
    store: Arc<dyn SessionStore>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (handle, task) = SessionService::spawn(
        config,
        StaticSensors::new(availability),
        store,
        Some(events_tx),
    );
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let printed = match &event {
                Event::StateSnapshot { snapshot } => print_snapshot(snapshot, json),
                other if is_notable(other) => print_event(other, json),
                _ => Ok(()),
            };
            if printed.is_err() {
                break;
            }
        }
    });

    let sensors = handle.sensors();
    let origin = records.first().map(|r| r.at_ms).unwrap_or(0);
    let started = tokio::time::Instant::now();
    let mut result = Ok(());
    for record in &records {
        let offset = Duration::from_millis(record.at_ms - origin);
        tokio::time::sleep_until(started + offset).await;

        let applied = match &record.entry {
            TraceEntry::Sensor(reading) => sensors.send(reading.clone()),
            TraceEntry::Command(command) => match command {
                TraceCommand::SelectEmotions => handle.begin_emotion_selection().await.map(drop),
                TraceCommand::Emotion { emotion } => handle.toggle_emotion(*emotion).await.map(drop),
                TraceCommand::Start { .. } => handle.start().await.map(drop),
                TraceCommand::Pause => handle.pause().await.map(drop),
                TraceCommand::Resume => handle.resume().await.map(drop),
                TraceCommand::Stop => match handle.stop().await {
                    Ok(session) => print_session(&session, json).map_err(CoreError::from),
                    Err(e) => Err(e),
                },
                TraceCommand::Reset => handle.reset().await.map(drop),
            },
        };
        if applied.is_err() {
            result = applied;
            break;
        }
    }

    drop(sensors);
    drop(handle);
    task.await?;
    printer.await?;
    Ok(result?)
}

fn is_notable(event: &Event) -> bool {
    !matches!(
        event,
        Event::StateSnapshot { .. } | Event::EmotionToggled { .. }
    )
}

fn activity_label(activity: Option<ActivityType>) -> &'static str {
    activity.map(ActivityType::label).unwrap_or("unknown")
}

fn print_snapshot(snapshot: &WalkingSnapshot, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }
    let speed = snapshot
        .speed_mps
        .map(|s| format!("{s:.1} m/s"))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:>8}  {:<8}  steps {:>6} ({:>6} validated)  {:>9}  {:>8}  {}",
        snapshot.formatted_duration(),
        snapshot.state.to_string(),
        snapshot.step_count,
        snapshot.validated_step_count,
        format_distance(snapshot.distance_m),
        speed,
        activity_label(snapshot.current_activity),
    );
    Ok(())
}

fn print_event(event: &Event, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let line = match event {
        Event::SessionStarted { session_id, .. } => format!("session {session_id} started"),
        Event::SessionPaused { elapsed_ms, .. } => format!("paused after {}s", elapsed_ms / 1000),
        Event::SessionResumed { excluded_steps, .. } => {
            format!("resumed ({excluded_steps} steps during pause excluded)")
        }
        Event::SessionCompleted { session_id, .. } => format!("session {session_id} completed"),
        Event::SessionFailed { reason, .. } => format!("session failed: {reason}"),
        Event::SessionReset { .. } => "session reset".to_string(),
        Event::ActivityChanged { activity, .. } => {
            format!("activity: {}", activity.label())
        }
        Event::StepRejected { reason, step_delta, .. } => {
            format!("rejected {step_delta} steps: {reason}")
        }
        Event::LocationGap { since_last_fix_ms, .. } => {
            format!("no location fix for {}s", since_last_fix_ms / 1000)
        }
        Event::PersistenceFailed { message, .. } => format!("could not save session: {message}"),
        Event::EmotionSelectionStarted { .. } => "selecting emotions".to_string(),
        Event::EmotionToggled { .. } | Event::StateSnapshot { .. } => return Ok(()),
    };
    println!("  * {line}");
    Ok(())
}

fn print_session(session: &WalkingSession, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(session)?);
        return Ok(());
    }
    println!("session {}", session.id);
    println!("  steps     {}", session.step_count);
    println!("  distance  {}", session.formatted_distance());
    println!("  duration  {}s", session.duration_ms / 1000);
    println!("  locations {}", session.locations.len());
    println!(
        "  primary   {}",
        activity_label(session.primary_activity)
    );
    for interval in &session.activity_intervals {
        println!(
            "    {:<10} {:>6}s  {}",
            interval.activity.label(),
            interval.duration_ms / 1000,
            format_distance(interval.distance_m)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use walktrace_core::{MovementState, SessionState};

    const TRACE: &str = r#"
# short walk with a pause
{"at_ms": 0, "command": "emotion", "emotion": "happy"}
{"at_ms": 0, "command": "start"}
{"at_ms": 0, "kind": "pedometer", "steps": 900}
{"at_ms": 500, "kind": "accelerometer", "movement": "walking", "acceleration": 1.8, "timestamp_ms": 500}
{"at_ms": 1000, "kind": "activity", "activity": "walking", "confidence": 80}
{"at_ms": 2000, "kind": "accelerometer", "movement": "walking", "acceleration": 1.8, "timestamp_ms": 2000}
{"at_ms": 10000, "kind": "pedometer", "steps": 920}
{"at_ms": 10000, "command": "pause"}
{"at_ms": 15000, "kind": "pedometer", "steps": 926}
{"at_ms": 20000, "command": "resume"}
{"at_ms": 25000, "kind": "pedometer", "steps": 936}
{"at_ms": 30000, "command": "stop"}
"#;

    #[test]
    fn parses_commands_and_readings() {
        let records = parse_trace(TRACE).unwrap();
        assert_eq!(records.len(), 12);
        assert_eq!(
            records[0].entry,
            TraceEntry::Command(TraceCommand::Emotion {
                emotion: EmotionType::Happy
            })
        );
        assert_eq!(
            records[2].entry,
            TraceEntry::Sensor(SensorEvent::Pedometer { steps: 900 })
        );
        match &records[3].entry {
            TraceEntry::Sensor(SensorEvent::Accelerometer(sample)) => {
                assert_eq!(sample.movement, MovementState::Walking);
                assert_eq!(sample.timestamp_ms, 500);
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_order_and_malformed_lines() {
        let err = parse_trace("{\"at_ms\": 5, \"command\": \"start\"}\n{\"at_ms\": 4, \"command\": \"stop\"}")
            .unwrap_err();
        assert!(err.contains("line 2"));

        let err = parse_trace("{\"at_ms\": 1, \"command\": \"fly\"}").unwrap_err();
        assert!(err.starts_with("line 1"));
    }

    #[test]
    fn replay_is_deterministic() {
        let records = parse_trace(TRACE).unwrap();
        let outcome = replay(&records, Config::default(), 10_000).unwrap();
        let session = outcome.session.as_ref().unwrap();

        assert_eq!(session.step_count, 30);
        assert_eq!(session.duration_ms, 20_000);
        assert_eq!(session.emotions[0].emotion, EmotionType::Happy);
        assert!(outcome.failure().is_none());
        assert_eq!(
            outcome.snapshots.last().map(|s| s.state),
            Some(SessionState::Completed)
        );

        let again = replay(&records, Config::default(), 10_000).unwrap();
        assert_eq!(again.session.unwrap().step_count, session.step_count);
        assert_eq!(again.snapshots.len(), outcome.snapshots.len());
    }

    #[test]
    fn snapshots_follow_the_report_interval() {
        let records = parse_trace(TRACE).unwrap();
        let outcome = replay(&records, Config::default(), 5_000).unwrap();
        // Reports at 5, 10, 15, 20, 25 and 30 s plus the final one at stop.
        assert_eq!(outcome.snapshots.len(), 7);
    }

    #[test]
    fn missing_sensor_is_reported_as_failure() {
        let trace = r#"{"at_ms": 0, "command": "start", "availability": {"pedometer": false, "accelerometer": true, "activity_recognition": true, "location": true}}"#;
        let records = parse_trace(trace).unwrap();
        let outcome = replay(&records, Config::default(), 0).unwrap();
        assert!(outcome.session.is_none());
        assert!(matches!(
            outcome.failure(),
            Some(CoreError::SensorUnavailable {
                sensor: SensorKind::Pedometer
            })
        ));
    }

    #[test]
    fn sensor_failure_mid_walk_is_reported_as_failed() {
        let trace = r#"
{"at_ms": 0, "command": "start", "availability": {"pedometer": false, "accelerometer": true, "activity_recognition": true, "location": true}}
{"at_ms": 1000, "command": "start"}
{"at_ms": 2000, "kind": "failure", "sensor": "accelerometer", "message": "hub restarted"}
"#;
        let records = parse_trace(trace).unwrap();
        let outcome = replay(&records, Config::default(), 0).unwrap();
        assert!(matches!(
            outcome.failure(),
            Some(CoreError::SensorFailed {
                sensor: SensorKind::Accelerometer,
                ..
            })
        ));
    }

    #[test]
    fn huge_report_interval_only_reports_at_stop() {
        let records = parse_trace(TRACE).unwrap();
        let outcome = replay(&records, Config::default(), u64::MAX).unwrap();
        assert_eq!(outcome.snapshots.len(), 1);
        assert!(outcome.session.is_some());
    }

    #[test]
    fn json_dir_store_writes_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_for(Some(dir.path()));
        let records = parse_trace(TRACE).unwrap();
        let outcome = replay(&records, Config::default(), 0).unwrap();
        let session = outcome.session.unwrap();

        store.save(&session).unwrap();
        let written = std::fs::read_to_string(dir.path().join(format!("{}.json", session.id))).unwrap();
        let parsed: WalkingSession = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, session);
    }
}
