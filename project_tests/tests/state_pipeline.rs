//! Transformer output flowing through the state manager to channel and
//! callback subscribers, without any network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_sentinel::model::{AlertLevel, PowerMode};
use lib_sentinel::{DataTransformer, Snapshot, StateManager, StateManagerConfig};
use project_tests::fixture_record;
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn transformed_record_reaches_every_kind_of_subscriber() {
    let state = StateManager::new(StateManagerConfig::default());
    let mut channel = state.subscribe_channel();
    let seen: Arc<Mutex<Vec<Snapshot>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let _sub = state.subscribe(move |snap| sink.lock().unwrap().push(snap.clone()));

    let snapshot = DataTransformer::default().transform(&fixture_record());
    state.update_state(serde_json::to_value(&snapshot).unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let received = channel.recv().await.expect("one snapshot on the channel");
    assert_eq!(received.intruders.len(), 1);
    assert_eq!(received.system_status.power_mode, PowerMode::Active);
    assert_eq!(received.alerts.alert_level, AlertLevel::High);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].intruders, received.intruders);
    assert!(Arc::ptr_eq(&received, &state.current()));
}

#[tokio::test(start_paused = true)]
async fn hand_written_partials_keep_invariants() {
    let state = StateManager::new(StateManagerConfig::default());
    let snapshot = DataTransformer::default().transform(&fixture_record());
    state.update_state(serde_json::to_value(&snapshot).unwrap());
    state.flush_now();

    // Dropping the only track by hand orphans its threat intel.
    state.update_state(json!({"intruders": []}));
    state.update_state(json!({"systemStatus": {"powerMode": "NotAMode"}}));
    state.flush_now();

    let current = state.get_current_state();
    assert!(current.intruders.is_empty());
    assert!(current.threat_intelligence.is_empty());
    assert_eq!(current.system_status.power_mode, PowerMode::Active);
    // One warning alert remains.
    assert_eq!(current.alerts.alert_level, AlertLevel::Elevated);
    assert_eq!(state.stats().rejected_updates, 1);
    assert_eq!(state.history().len(), 2);
}

#[test]
fn invalid_records_become_the_default_snapshot() {
    let transformer = DataTransformer::default();
    for raw in [json!(null), json!({"system": {}}), json!({"system": 1, "tracks": [], "alerts": []})] {
        assert!(!transformer.validate(&raw));
        assert_eq!(transformer.transform(&raw), Snapshot::default());
    }
}
