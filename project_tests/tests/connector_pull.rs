//! Connector against an in-process pull endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_sentinel::model::{AlertLevel, PowerMode, ThreatLevel, Zone};
use lib_sentinel::{
    ConnectionStatus, ConnectorOptions, DataSource, Snapshot, StateManager, StateManagerConfig,
    TransportConnector, TransportError,
};
use project_tests::{MockPullServer, fixture_record, pull_body, wait_until};

fn pull_options(url: String) -> ConnectorOptions {
    ConnectorOptions {
        pull_url: Some(url),
        prefer_push: false,
        update_frequency: 20.0,
        request_timeout_ms: 2_000,
        pull_retries: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn subscribe_connects_and_publishes_transformed_snapshots() {
    let server = MockPullServer::with_record(&fixture_record()).await;
    let state = StateManager::new(StateManagerConfig::default());
    let connector = TransportConnector::new(state.clone(), pull_options(server.url())).unwrap();

    let seen: Arc<Mutex<Vec<Snapshot>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let _sub = connector.subscribe(move |snap| sink.lock().unwrap().push(snap.clone()));
    assert_eq!(seen.lock().unwrap()[0], Snapshot::default());

    assert!(wait_until(Duration::from_secs(5), || state.current().intruders.len() == 1).await);
    let snap = state.get_current_state();

    let intruder = &snap.intruders[0];
    assert_eq!(intruder.id, "TRK-007");
    assert_eq!(intruder.zone, Zone::Restricted);
    assert_eq!(intruder.threat_score, 82);
    assert_eq!(intruder.threat_level, ThreatLevel::High);
    assert_eq!(snap.threat_intelligence["TRK-007"].behavior.trajectory_confidence, 71);
    assert_eq!(snap.system_status.power_mode, PowerMode::Active);
    assert_eq!(snap.alerts.alert_level, AlertLevel::High);
    assert_eq!(
        snap.alerts.recommendation,
        "HIGH ALERT: Monitor 1 tracked target(s) and prepare response."
    );
    assert_eq!(snap.video_status.resolution, "1280x720");
    assert_eq!(snap.metadata.data_source, DataSource::Pull);
    assert_eq!(snap.metadata.connection_status, ConnectionStatus::Connected);

    assert!(connector.is_healthy());
    assert_eq!(connector.status(), ConnectionStatus::Connected);
    assert!(seen.lock().unwrap().len() >= 2);
}

#[tokio::test]
async fn last_unsubscribe_stops_polling() {
    let server = MockPullServer::with_record(&fixture_record()).await;
    let state = StateManager::new(StateManagerConfig::default());
    let connector = TransportConnector::new(state.clone(), pull_options(server.url())).unwrap();

    let first = connector.subscribe(|_| {});
    let second = connector.subscribe(|_| {});
    assert_eq!(connector.subscriber_count(), 2);
    assert!(wait_until(Duration::from_secs(5), || server.hits() >= 2).await);

    drop(first);
    assert_eq!(connector.status(), ConnectionStatus::Connected);
    second.unsubscribe();
    assert_eq!(connector.status(), ConnectionStatus::Disconnected);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = server.hits();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.hits(), settled);

    assert!(
        wait_until(Duration::from_secs(2), || {
            state.current().metadata.connection_status == ConnectionStatus::Disconnected
        })
        .await
    );
}

#[tokio::test]
async fn http_errors_are_recorded_and_polling_recovers() {
    let server = MockPullServer::start(503, r#"{"error":"warming up"}"#.into()).await;
    let state = StateManager::new(StateManagerConfig::default());
    let connector = TransportConnector::new(state.clone(), pull_options(server.url())).unwrap();
    let _sub = connector.subscribe(|_| {});

    assert!(wait_until(Duration::from_secs(5), || connector.error_count() >= 2).await);
    assert!(!connector.is_healthy());
    assert!(matches!(
        connector.get_last_error(),
        Some(TransportError::Http { status: 503, .. })
    ));

    server.set_reply(200, pull_body(&fixture_record()));
    assert!(wait_until(Duration::from_secs(5), || connector.is_healthy()).await);
    assert!(wait_until(Duration::from_secs(2), || state.current().intruders.len() == 1).await);
    assert!(state.current().metadata.error_count.unwrap_or(0) >= 2);
}

#[tokio::test]
async fn pull_outage_is_visible_in_connection_status() {
    let server = MockPullServer::with_record(&fixture_record()).await;
    let state = StateManager::new(StateManagerConfig::default());
    let connector = TransportConnector::new(state.clone(), pull_options(server.url())).unwrap();
    let _sub = connector.subscribe(|_| {});

    let link = |status: ConnectionStatus| {
        connector.status() == status && state.current().metadata.connection_status == status
    };
    assert!(wait_until(Duration::from_secs(5), || link(ConnectionStatus::Connected)).await);

    server.set_reply(503, r#"{"error":"overloaded"}"#.into());
    assert!(wait_until(Duration::from_secs(5), || link(ConnectionStatus::Connecting)).await);
    assert!(!connector.is_healthy());
    assert!(state.current().metadata.error_count.unwrap_or(0) >= 1);

    server.set_reply(200, pull_body(&fixture_record()));
    assert!(wait_until(Duration::from_secs(5), || link(ConnectionStatus::Connected)).await);
    assert!(connector.is_healthy());
}

#[tokio::test]
async fn upstream_failure_envelope_is_an_error() {
    let server = MockPullServer::start(200, r#"{"success":false,"error":"sensor offline"}"#.into()).await;
    let connector =
        TransportConnector::new(StateManager::default(), pull_options(server.url())).unwrap();

    assert!(connector.refresh().await.is_none());
    assert_eq!(
        connector.get_last_error(),
        Some(TransportError::Upstream("sensor offline".into()))
    );
}

#[tokio::test]
async fn refresh_fetches_once_outside_a_session() {
    let server = MockPullServer::start(500, "boom".into()).await;
    let state = StateManager::new(StateManagerConfig::default());
    let mut options = pull_options(server.url());
    options.pull_auth_token = Some("s3cret".into());
    let connector = TransportConnector::new(state.clone(), options).unwrap();

    assert!(connector.refresh().await.is_none());
    assert!(matches!(
        connector.get_last_error(),
        Some(TransportError::Http { status: 500, .. })
    ));

    server.set_reply(200, pull_body(&fixture_record()));
    let snap = connector.refresh().await.expect("snapshot from refresh");
    assert_eq!(snap.intruders.len(), 1);
    assert_eq!(snap.metadata.data_source, DataSource::Pull);
    assert_eq!(connector.status(), ConnectionStatus::Disconnected);

    assert!(wait_until(Duration::from_secs(2), || state.current().intruders.len() == 1).await);
    // The shared state agrees with the returned snapshot even while idle.
    assert_eq!(state.current().metadata.data_source, DataSource::Pull);
    assert_eq!(server.hits(), 2);
    let request = server.requests()[1].to_lowercase();
    assert!(request.contains("authorization: bearer s3cret"), "{request}");
}

#[tokio::test]
async fn disconnect_is_idempotent_and_reconnect_works() {
    let server = MockPullServer::with_record(&fixture_record()).await;
    let connector =
        TransportConnector::new(StateManager::default(), pull_options(server.url())).unwrap();

    connector.connect();
    assert!(wait_until(Duration::from_secs(5), || connector.status() == ConnectionStatus::Connected).await);

    connector.disconnect();
    connector.disconnect();
    assert_eq!(connector.status(), ConnectionStatus::Disconnected);
    assert!(!connector.is_healthy());

    connector.connect();
    assert!(wait_until(Duration::from_secs(5), || connector.status() == ConnectionStatus::Connected).await);
    connector.disconnect();
}
