//! Integration tests for the session service and configuration file.

use std::sync::Arc;

use tokio::sync::mpsc;
use walktrace_core::{
    ActivityType, ActivityUpdate, Config, ConfigError, CoreError, EmotionType, Event,
    MemorySessionStore, SensorAvailability, SessionService, SessionState, StaticSensors,
};

#[test]
fn test_config_file_roundtrip_with_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = Config::default();
    config.set("stabilizer.min_dwell_ms", "800").unwrap();
    config.set("distance.default_step_length_m", "0.75").unwrap();
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.get("stabilizer.min_dwell_ms").as_deref(), Some("800"));
    assert_eq!(loaded.get("distance.default_step_length_m").as_deref(), Some("0.75"));
}

#[test]
fn test_partial_config_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[session]\nlocation_gap_ms = 45000\n").unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded.session.location_gap_ms, 45_000);
    assert_eq!(loaded.stabilizer, Config::default().stabilizer);
}

#[test]
fn test_unknown_key_is_rejected() {
    let mut config = Config::default();
    let err = config.set("session.nope", "1").unwrap_err();
    assert!(matches!(err, ConfigError::UnknownKey(_)));
}

#[tokio::test]
async fn test_full_walk_through_service() {
    let store = Arc::new(MemorySessionStore::new());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (handle, task) = SessionService::spawn(
        Config::default(),
        StaticSensors::new(SensorAvailability::all()),
        store.clone(),
        Some(events_tx),
    );

    handle.begin_emotion_selection().await.unwrap();
    handle.toggle_emotion(EmotionType::Content).await.unwrap();
    handle.start().await.unwrap();

    let sensors = handle.sensors();
    sensors
        .activity(ActivityUpdate {
            activity: ActivityType::Walking,
            confidence: 85,
        })
        .unwrap();
    sensors.pedometer(2_000).unwrap();
    sensors.pedometer(2_030).unwrap();

    handle.pause().await.unwrap();
    sensors.pedometer(2_035).unwrap();
    handle.resume().await.unwrap();
    sensors.pedometer(2_045).unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.validated_step_count, 40);
    assert_eq!(snapshot.current_activity, Some(ActivityType::Walking));

    let session = handle.stop().await.unwrap();
    assert_eq!(session.step_count, 40);
    assert_eq!(session.emotions.len(), 1);
    assert_eq!(session.emotions[0].emotion, EmotionType::Content);
    assert_eq!(store.len(), 1);

    // Readings after stop are ignored.
    sensors.pedometer(3_000).unwrap();
    assert_eq!(handle.session().await.unwrap().unwrap().step_count, 40);

    drop(handle);
    drop(sensors);
    task.await.unwrap();

    let mut transitions = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        if let Some(state) = event.resulting_state() {
            transitions.push(state);
        }
    }
    assert_eq!(transitions.first(), Some(&SessionState::EmotionSelection));
    assert_eq!(transitions.last(), Some(&SessionState::Completed));
}

#[tokio::test]
async fn test_commands_fail_after_shutdown() {
    let (handle, task) = SessionService::spawn(
        Config::default(),
        StaticSensors::default(),
        Arc::new(MemorySessionStore::new()),
        None,
    );
    let sensors = handle.sensors();
    assert!(handle.snapshot().await.is_ok());

    task.abort();
    let _ = task.await;

    assert!(matches!(handle.snapshot().await, Err(CoreError::ServiceClosed)));
    assert!(matches!(sensors.pedometer(10), Err(CoreError::ServiceClosed)));
}

#[tokio::test]
async fn test_invalid_command_reports_transition_error() {
    let (handle, _task) = SessionService::spawn(
        Config::default(),
        StaticSensors::default(),
        Arc::new(MemorySessionStore::new()),
        None,
    );
    let err = handle.pause().await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
    assert!(matches!(
        handle.reset().await.unwrap(),
        Event::SessionReset { .. }
    ));
}
