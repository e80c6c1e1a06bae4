//! # Transport Connector
//!
//! Keeps one live feed from the detection backend and turns what arrives into
//! state updates.
//!
//! A session prefers the push transport when one is configured. Push failures
//! are retried with exponential backoff; once the attempts are exhausted the
//! session falls back to polling the pull transport and stays there until the
//! next explicit [`connect`](TransportConnector::connect). All failures are
//! recorded as state (`last_error`, health flag, `metadata.errorCount`) and
//! never returned from `connect` or `subscribe`.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffStep, ReconnectPolicy};
use super::options::ConnectorOptions;
use crate::core::{StateManager, SubscriberRegistry, Subscription};
use crate::errors::{ConfigError, TransportError};
use crate::ingestors::{PullPoller, PushConfig, PushSession, TelemetrySink};
use crate::model::{ConnectionStatus, DataSource, PushEnvelope, PushMessageKind, Snapshot};
use crate::schema::validate_record;
use crate::transformer::DataTransformer;

/// Raw alert entries kept in the last known record between push deltas.
const MAX_RAW_ALERTS: usize = 50;

/// How long a cancelled session may take to wind down before it is aborted.
const SESSION_STOP_GRACE: Duration = Duration::from_secs(1);

/// Info-level lifecycle events, gated by `enable_logging`.
macro_rules! log_if {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::info!($($arg)+);
        }
    };
}

struct Session {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    /// Cancels the session loop. A task still running after
    /// [`SESSION_STOP_GRACE`] (for instance stuck sending the close frame) is
    /// aborted.
    fn stop(self) {
        let Session { token, mut task } = self;
        token.cancel();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if timeout(SESSION_STOP_GRACE, &mut task).await.is_err() {
                        tracing::debug!("session task did not stop in time, aborting");
                        task.abort();
                    }
                });
            }
            Err(_) => task.abort(),
        }
    }
}

struct ConnectorInner {
    options: ConnectorOptions,
    transformer: DataTransformer,
    status: ConnectionStatus,
    source: DataSource,
    healthy: bool,
    last_error: Option<TransportError>,
    error_count: u64,
    policy: ReconnectPolicy,
    push_disabled: bool,
    session: Option<Session>,
    /// Bumped for every new session so callbacks from a stale one are ignored.
    generation: u64,
    registry: SubscriberRegistry,
    /// Last complete record seen on either transport. Push deltas apply to it.
    last_raw: Value,
}

impl ConnectorInner {
    fn policy_for(options: &ConnectorOptions) -> ReconnectPolicy {
        ReconnectPolicy::new(
            options.max_reconnect_attempts,
            Duration::from_millis(options.reconnect_base_delay_ms),
            Duration::from_millis(options.reconnect_max_delay_ms),
        )
    }

    fn push_available(&self) -> bool {
        self.options.prefer_push && self.options.push_url.is_some() && !self.push_disabled
    }

    fn metadata_patch(&self) -> Value {
        json!({
            "metadata": {
                "connectionStatus": self.status,
                "dataSource": self.source,
                "errorCount": self.error_count,
            }
        })
    }

    fn record_error(&mut self, source: DataSource, error: &TransportError) -> Value {
        self.last_error = Some(error.clone());
        self.healthy = false;
        self.error_count += 1;
        tracing::warn!(?source, error = %error, errors = self.error_count, "transport error");
        self.metadata_patch()
    }

    /// Stamps connector metadata onto a transformed snapshot and serializes it
    /// as a state update.
    fn snapshot_patch(&self, mut snapshot: Snapshot, source: DataSource) -> Option<Value> {
        snapshot.metadata.connection_status = self.status;
        snapshot.metadata.data_source = source;
        snapshot.metadata.error_count = Some(self.error_count);
        match serde_json::to_value(&snapshot) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize transformed snapshot");
                None
            }
        }
    }

    /// Runs the last known record through the transformer.
    fn retransform(&mut self) -> Option<Value> {
        self.transformer.set_source(self.source);
        match self.transformer.try_transform(&self.last_raw) {
            Ok(snapshot) => self.snapshot_patch(snapshot, self.source),
            Err(err) => {
                self.error_count += 1;
                tracing::warn!(field = err.field(), error = %err, "dropping invalid telemetry record");
                Some(self.metadata_patch())
            }
        }
    }

    /// Folds one push envelope into `last_raw`. Returns `false` if nothing changed.
    fn apply_push(&mut self, envelope: PushEnvelope) -> bool {
        let PushEnvelope { kind, timestamp, data } = envelope;
        if kind == PushMessageKind::Heartbeat {
            return false;
        }
        if !self.last_raw.is_object() {
            self.last_raw = empty_record();
        }

        if kind == PushMessageKind::SystemUpdate && validate_record(&data).is_ok() {
            self.last_raw = data;
            return true;
        }

        let Some(record) = self.last_raw.as_object_mut() else {
            return false;
        };
        match kind {
            PushMessageKind::SystemUpdate if data.is_object() => {
                record.insert("system".into(), data);
            }
            PushMessageKind::TrackUpdate => {
                let tracks = match data {
                    Value::Array(_) => data,
                    Value::Object(mut map) => match map.remove("tracks") {
                        Some(tracks @ Value::Array(_)) => tracks,
                        _ => return self.reject_delta("track_update without a track list"),
                    },
                    _ => return self.reject_delta("track_update without a track list"),
                };
                record.insert("tracks".into(), tracks);
            }
            PushMessageKind::Alert => {
                let incoming = match data {
                    Value::Array(items) => items,
                    item @ Value::Object(_) => vec![item],
                    _ => return self.reject_delta("alert without an alert object"),
                };
                let alerts = record
                    .entry("alerts")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !alerts.is_array() {
                    *alerts = Value::Array(Vec::new());
                }
                if let Value::Array(list) = alerts {
                    list.extend(incoming);
                    let excess = list.len().saturating_sub(MAX_RAW_ALERTS);
                    list.drain(..excess);
                }
            }
            _ => return self.reject_delta("system_update without a system object"),
        }
        if let Some(ts) = timestamp {
            record.insert("timestamp".into(), Value::String(ts));
        }
        true
    }

    fn reject_delta(&mut self, reason: &str) -> bool {
        self.error_count += 1;
        tracing::warn!(reason, "dropping malformed push message");
        false
    }
}

fn empty_record() -> Value {
    let mut map = Map::new();
    map.insert("system".into(), Value::Object(Map::new()));
    map.insert("tracks".into(), Value::Array(Vec::new()));
    map.insert("alerts".into(), Value::Array(Vec::new()));
    Value::Object(map)
}

struct ConnectorShared {
    state: StateManager,
    inner: Mutex<ConnectorInner>,
}

impl ConnectorShared {
    fn lock(&self) -> MutexGuard<'_, ConnectorInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for ConnectorShared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|p| p.into_inner());
        if let Some(session) = inner.session.take() {
            session.stop();
        }
    }
}

/// Handle to one connector. Clones share the same session and state.
#[derive(Clone)]
pub struct TransportConnector {
    shared: Arc<ConnectorShared>,
}

impl TransportConnector {
    /// Creates a disconnected connector publishing into `state`.
    pub fn new(state: StateManager, options: ConnectorOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let max_alerts = state.config().max_recent_alerts;
        let inner = ConnectorInner {
            policy: ConnectorInner::policy_for(&options),
            registry: SubscriberRegistry::new(options.linger()),
            transformer: DataTransformer::new(DataSource::Push).with_max_recent_alerts(max_alerts),
            options,
            status: ConnectionStatus::Disconnected,
            source: DataSource::Push,
            healthy: false,
            last_error: None,
            error_count: 0,
            push_disabled: false,
            session: None,
            generation: 0,
            last_raw: empty_record(),
        };
        Ok(Self {
            shared: Arc::new(ConnectorShared {
                state,
                inner: Mutex::new(inner),
            }),
        })
    }

    pub fn state(&self) -> &StateManager {
        &self.shared.state
    }

    /// Starts a session. No-op while an attempt is in flight, while connected
    /// via push, or while connected via pull when push is not preferred.
    /// Connected via pull with push preferred, it restarts and retries push.
    pub fn connect(&self) {
        let patch = {
            let mut inner = self.shared.lock();
            let push_preferred = inner.options.prefer_push && inner.options.push_url.is_some();
            if inner.session.is_some() {
                match inner.status {
                    ConnectionStatus::Connecting => return,
                    ConnectionStatus::Connected
                        if inner.source == DataSource::Push || !push_preferred =>
                    {
                        return
                    }
                    _ => {}
                }
            }

            let handle = match Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => {
                    tracing::error!("connect called outside a Tokio runtime");
                    inner.last_error = Some(TransportError::NoRuntime);
                    inner.healthy = false;
                    return;
                }
            };

            if let Some(old) = inner.session.take() {
                old.stop();
            }
            inner.generation += 1;
            inner.policy.reset();
            inner.push_disabled = false;
            inner.status = ConnectionStatus::Connecting;
            inner.source = if push_preferred { DataSource::Push } else { DataSource::Pull };
            inner.last_error = None;

            let token = CancellationToken::new();
            let task = handle.spawn(run_session(
                Arc::downgrade(&self.shared),
                inner.generation,
                token.clone(),
            ));
            inner.session = Some(Session { token, task });
            log_if!(inner.options.enable_logging, source = ?inner.source, "connecting");
            inner.metadata_patch()
        };
        self.shared.state.update_state(patch);
    }

    /// Stops the session and resets retry state. Idempotent.
    pub fn disconnect(&self) {
        let patch = {
            let mut inner = self.shared.lock();
            let session = inner.session.take();
            let was_disconnected = inner.status == ConnectionStatus::Disconnected;
            inner.generation += 1;
            inner.status = ConnectionStatus::Disconnected;
            inner.healthy = false;
            inner.policy.reset();
            inner.push_disabled = false;
            if let Some(session) = session {
                session.stop();
            }
            if was_disconnected {
                return;
            }
            log_if!(inner.options.enable_logging, "disconnected");
            inner.metadata_patch()
        };
        self.shared.state.update_state(patch);
    }

    /// Registers a snapshot callback. The callback immediately receives the
    /// current snapshot. The first subscriber starts a session; dropping the
    /// last handle stops it, after the configured linger.
    pub fn subscribe<F>(&self, callback: F) -> ConnectorSubscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let subscription = self.shared.state.subscribe(callback);
        self.shared.state.deliver_current(subscription.id());

        let registry = self.shared.lock().registry.clone();
        if registry.acquire() {
            let idle = self.shared.lock().session.is_none();
            if idle {
                self.connect();
            }
        }
        ConnectorSubscription {
            connector: Arc::downgrade(&self.shared),
            subscription: Some(subscription),
        }
    }

    /// One bounded pull fetch outside the session. Updates the shared state
    /// and returns the new snapshot, or `None` on any failure (recorded as
    /// `last_error`).
    pub async fn refresh(&self) -> Option<Snapshot> {
        let options = self.shared.lock().options.clone();
        let Some(url) = options.pull_url.as_deref() else {
            let patch = self.shared.lock().record_error(
                DataSource::Pull,
                &TransportError::InvalidUrl("no pull url configured".into()),
            );
            self.shared.state.update_state(patch);
            return None;
        };

        let fetched = match PullPoller::new(
            url,
            options.request_timeout(),
            options.poll_interval(),
            options.pull_retries,
            options.pull_auth_token.clone(),
        ) {
            Ok(poller) => poller.fetch_once().await,
            Err(err) => Err(err),
        };

        let record = match fetched {
            Ok(record) => record,
            Err(err) => {
                let patch = self.shared.lock().record_error(DataSource::Pull, &err);
                self.shared.state.update_state(patch);
                return None;
            }
        };

        let (patch, snapshot) = {
            let mut inner = self.shared.lock();
            let mut transformer = inner.transformer.clone();
            transformer.set_source(DataSource::Pull);
            match transformer.try_transform(&record) {
                Ok(mut snapshot) => {
                    inner.last_raw = record;
                    snapshot.metadata.connection_status = inner.status;
                    snapshot.metadata.error_count = Some(inner.error_count);
                    snapshot.metadata.data_source = DataSource::Pull;
                    (inner.snapshot_patch(snapshot.clone(), DataSource::Pull), Some(snapshot))
                }
                Err(err) => {
                    inner.error_count += 1;
                    tracing::warn!(error = %err, "refresh returned an invalid record");
                    (Some(inner.metadata_patch()), None)
                }
            }
        };
        if let Some(patch) = patch {
            self.shared.state.update_state(patch);
        }
        snapshot
    }

    /// Replaces the options. A running session restarts when a transport
    /// setting changed.
    pub fn configure(&self, options: ConnectorOptions) -> Result<(), ConfigError> {
        options.validate()?;
        let restart = {
            let mut inner = self.shared.lock();
            let restart = inner.session.is_some() && inner.options.transport_changed(&options);
            inner.policy = ConnectorInner::policy_for(&options);
            inner.registry.set_linger(options.linger());
            log_if!(options.enable_logging, restart, "connector reconfigured");
            inner.options = options;
            restart
        };
        if restart {
            self.disconnect();
            self.connect();
        }
        Ok(())
    }

    pub fn is_healthy(&self) -> bool {
        self.shared.lock().healthy
    }

    pub fn get_last_error(&self) -> Option<TransportError> {
        self.shared.lock().last_error.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().status
    }

    pub fn data_source(&self) -> DataSource {
        self.shared.lock().source
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().policy.attempt()
    }

    /// `true` once push attempts were exhausted in the current session.
    pub fn push_disabled(&self) -> bool {
        self.shared.lock().push_disabled
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().registry.count()
    }

    pub fn error_count(&self) -> u64 {
        self.shared.lock().error_count
    }

    pub fn options(&self) -> ConnectorOptions {
        self.shared.lock().options.clone()
    }
}

/// Subscriber handle returned by [`TransportConnector::subscribe`].
///
/// Dropping it unsubscribes; the last one to go releases the connection.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct ConnectorSubscription {
    connector: Weak<ConnectorShared>,
    subscription: Option<Subscription<Arc<Snapshot>>>,
}

impl ConnectorSubscription {
    pub fn id(&self) -> Option<u64> {
        self.subscription.as_ref().map(Subscription::id)
    }

    /// Unsubscribes now. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        subscription.unsubscribe();
        let Some(shared) = self.connector.upgrade() else {
            return;
        };
        let registry = shared.lock().registry.clone();
        let weak = Weak::clone(&self.connector);
        registry.release(move || {
            if let Some(shared) = weak.upgrade() {
                TransportConnector { shared }.disconnect();
            }
        });
    }
}

impl Drop for ConnectorSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Receives ingestor callbacks for one session generation.
struct SessionSink {
    shared: Weak<ConnectorShared>,
    generation: u64,
}

impl SessionSink {
    /// Runs `f` against the connector state if this session is still current,
    /// then applies the returned state update outside the lock.
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ConnectorInner) -> Option<Value>,
    {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let patch = {
            let mut inner = shared.lock();
            if inner.generation != self.generation {
                return;
            }
            f(&mut inner)
        };
        if let Some(patch) = patch {
            shared.state.update_state(patch);
        }
    }
}

impl TelemetrySink for SessionSink {
    fn opened(&self, source: DataSource) {
        self.update(|inner| {
            inner.status = ConnectionStatus::Connected;
            inner.source = source;
            inner.healthy = true;
            if source == DataSource::Push {
                inner.policy.reset();
            }
            log_if!(inner.options.enable_logging, ?source, "transport connected");
            Some(inner.metadata_patch())
        });
    }

    fn push_message(&self, envelope: PushEnvelope) {
        self.update(|inner| {
            inner.healthy = true;
            if inner.apply_push(envelope) {
                inner.retransform()
            } else {
                None
            }
        });
    }

    fn pull_record(&self, record: Value) {
        self.update(|inner| {
            inner.healthy = true;
            inner.last_raw = record;
            inner.retransform()
        });
    }

    fn rejected_frame(&self, source: DataSource, reason: String) {
        self.update(|inner| {
            inner.error_count += 1;
            tracing::warn!(?source, %reason, "dropping undecodable frame");
            Some(inner.metadata_patch())
        });
    }

    /// Any failure drops the link back to `Connecting`; the next successful
    /// open or poll restores `Connected`.
    fn transport_error(&self, source: DataSource, error: &TransportError) {
        self.update(|inner| {
            inner.status = ConnectionStatus::Connecting;
            Some(inner.record_error(source, error))
        });
    }
}

/// Session settings read at the top of every loop iteration.
struct SessionPlan {
    options: ConnectorOptions,
    use_push: bool,
}

fn plan(shared: &Weak<ConnectorShared>, generation: u64) -> Option<SessionPlan> {
    let shared = shared.upgrade()?;
    let inner = shared.lock();
    if inner.generation != generation {
        return None;
    }
    Some(SessionPlan {
        use_push: inner.push_available(),
        options: inner.options.clone(),
    })
}

/// What the session should do after a failed push attempt.
fn after_push_failure(
    shared: &Weak<ConnectorShared>,
    generation: u64,
    error: &TransportError,
) -> Option<BackoffStep> {
    let shared = shared.upgrade()?;
    let mut inner = shared.lock();
    if inner.generation != generation {
        return None;
    }
    let step = if matches!(error, TransportError::InvalidUrl(_)) {
        BackoffStep::Fallback
    } else {
        inner.policy.next_step()
    };
    match step {
        BackoffStep::Retry(delay) => {
            log_if!(
                inner.options.enable_logging,
                attempt = inner.policy.attempt(),
                delay_ms = delay.as_millis() as u64,
                "scheduling push reconnect"
            );
        }
        BackoffStep::Fallback => {
            inner.push_disabled = true;
            inner.source = DataSource::Pull;
            tracing::warn!(
                attempts = inner.policy.attempt(),
                "push transport exhausted, falling back to pull"
            );
        }
    }
    Some(step)
}

async fn run_session(shared: Weak<ConnectorShared>, generation: u64, token: CancellationToken) {
    let sink = SessionSink {
        shared: Weak::clone(&shared),
        generation,
    };

    loop {
        let Some(plan) = plan(&shared, generation) else {
            return;
        };
        let options = &plan.options;

        if plan.use_push {
            let Some(url) = options.push_url.clone() else {
                return;
            };
            let session = PushSession::new(PushConfig {
                url,
                connect_timeout: options.request_timeout(),
                heartbeat_interval: options.heartbeat_interval(),
                silent_timeout: options.silent_timeout(),
            });
            match session.run(&sink, &token).await {
                Ok(()) => return,
                Err(err) => {
                    sink.transport_error(DataSource::Push, &err);
                    if token.is_cancelled() {
                        return;
                    }
                    match after_push_failure(&shared, generation, &err) {
                        Some(BackoffStep::Retry(delay)) => {
                            tokio::select! {
                                _ = token.cancelled() => return,
                                _ = sleep(delay) => continue,
                            }
                        }
                        Some(BackoffStep::Fallback) => continue,
                        None => return,
                    }
                }
            }
        }

        let Some(url) = options.pull_url.as_deref() else {
            sink.update(|inner| {
                inner.status = ConnectionStatus::Disconnected;
                Some(inner.record_error(
                    DataSource::Push,
                    &TransportError::Connect("push transport exhausted and no pull url configured".into()),
                ))
            });
            return;
        };
        match PullPoller::new(
            url,
            options.request_timeout(),
            options.poll_interval(),
            options.pull_retries,
            options.pull_auth_token.clone(),
        ) {
            Ok(poller) => {
                log_if!(
                    options.enable_logging,
                    interval_ms = poller.interval().as_millis() as u64,
                    "polling pull transport"
                );
                poller.run(&sink, &token).await;
            }
            Err(err) => {
                sink.update(|inner| {
                    inner.status = ConnectionStatus::Disconnected;
                    Some(inner.record_error(DataSource::Pull, &err))
                });
            }
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StateManagerConfig;

    fn pull_only() -> ConnectorOptions {
        ConnectorOptions {
            pull_url: Some("http://127.0.0.1:9/api/telemetry".into()),
            prefer_push: false,
            ..Default::default()
        }
    }

    fn inner_for_tests() -> ConnectorInner {
        let options = pull_only();
        ConnectorInner {
            policy: ConnectorInner::policy_for(&options),
            registry: SubscriberRegistry::new(options.linger()),
            transformer: DataTransformer::default(),
            options,
            status: ConnectionStatus::Connected,
            source: DataSource::Push,
            healthy: true,
            last_error: None,
            error_count: 0,
            push_disabled: false,
            session: None,
            generation: 1,
            last_raw: empty_record(),
        }
    }

    fn envelope(kind: PushMessageKind, data: Value) -> PushEnvelope {
        PushEnvelope {
            kind,
            timestamp: Some("2024-05-01T10:00:00Z".into()),
            data,
        }
    }

    #[test]
    fn new_rejects_invalid_options() {
        let result = TransportConnector::new(StateManager::default(), ConnectorOptions::default());
        assert!(matches!(result, Err(ConfigError::NoTransport)));
    }

    #[test]
    fn connect_outside_runtime_records_error() {
        let connector = TransportConnector::new(StateManager::default(), pull_only()).unwrap();
        connector.connect();
        assert_eq!(connector.get_last_error(), Some(TransportError::NoRuntime));
        assert_eq!(connector.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn push_deltas_fold_into_last_record() {
        let mut inner = inner_for_tests();

        assert!(!inner.apply_push(envelope(PushMessageKind::Heartbeat, Value::Null)));
        assert!(inner.apply_push(envelope(PushMessageKind::SystemUpdate, json!({"power_mode": "alert"}))));
        assert!(inner.apply_push(envelope(PushMessageKind::TrackUpdate, json!({"tracks": [{"id": 1}]}))));
        assert!(inner.apply_push(envelope(PushMessageKind::Alert, json!({"message": "gate", "level": "critical"}))));

        assert_eq!(inner.last_raw["system"]["power_mode"], "alert");
        assert_eq!(inner.last_raw["tracks"].as_array().unwrap().len(), 1);
        assert_eq!(inner.last_raw["alerts"].as_array().unwrap().len(), 1);
        assert_eq!(inner.last_raw["timestamp"], "2024-05-01T10:00:00Z");

        let patch = inner.retransform().unwrap();
        assert_eq!(patch["alerts"]["alertLevel"], "Critical");
        assert_eq!(patch["intruders"][0]["id"], "TRK-001");
    }

    #[test]
    fn full_system_update_replaces_record() {
        let mut inner = inner_for_tests();
        let record = json!({"system": {"fps": 30}, "tracks": [], "alerts": [], "timestamp": "x"});
        assert!(inner.apply_push(envelope(PushMessageKind::SystemUpdate, record.clone())));
        assert_eq!(inner.last_raw, record);
    }

    #[test]
    fn raw_alerts_are_bounded() {
        let mut inner = inner_for_tests();
        let batch: Vec<Value> = (0..80).map(|i| json!({"id": i, "time": "t", "message": "m"})).collect();
        assert!(inner.apply_push(envelope(PushMessageKind::Alert, Value::Array(batch))));
        let alerts = inner.last_raw["alerts"].as_array().unwrap();
        assert_eq!(alerts.len(), MAX_RAW_ALERTS);
        assert_eq!(alerts[0]["id"], 30);
    }

    #[test]
    fn malformed_deltas_are_counted() {
        let mut inner = inner_for_tests();
        assert!(!inner.apply_push(envelope(PushMessageKind::TrackUpdate, json!("nope"))));
        assert!(!inner.apply_push(envelope(PushMessageKind::Alert, json!(3))));
        assert!(!inner.apply_push(envelope(PushMessageKind::SystemUpdate, json!([1]))));
        assert_eq!(inner.error_count, 3);
    }

    #[test]
    fn invalid_record_is_dropped_not_defaulted() {
        let mut inner = inner_for_tests();
        inner.last_raw = json!({"system": {}});
        let patch = inner.retransform().unwrap();
        assert!(patch.get("intruders").is_none());
        assert_eq!(patch["metadata"]["errorCount"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_delivers_current_snapshot_immediately() {
        let state = StateManager::new(StateManagerConfig::default());
        let connector = TransportConnector::new(state, pull_only()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let sub = connector.subscribe(move |snap| sink.lock().unwrap().push(snap.clone()));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(seen.lock().unwrap()[0], Snapshot::default());
        assert_eq!(connector.subscriber_count(), 1);
        assert_eq!(connector.status(), ConnectionStatus::Connecting);

        sub.unsubscribe();
        assert_eq!(connector.subscriber_count(), 0);
        assert_eq!(connector.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent() {
        let connector = TransportConnector::new(StateManager::default(), pull_only()).unwrap();
        connector.disconnect();
        connector.connect();
        connector.disconnect();
        connector.disconnect();
        assert_eq!(connector.status(), ConnectionStatus::Disconnected);
        assert_eq!(connector.reconnect_attempts(), 0);
        assert!(!connector.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_without_pull_url_returns_none() {
        let options = ConnectorOptions {
            push_url: Some("ws://127.0.0.1:9".into()),
            ..Default::default()
        };
        let connector = TransportConnector::new(StateManager::default(), options).unwrap();
        assert!(connector.refresh().await.is_none());
        assert!(matches!(connector.get_last_error(), Some(TransportError::InvalidUrl(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn configure_validates_and_updates() {
        let connector = TransportConnector::new(StateManager::default(), pull_only()).unwrap();
        assert!(connector.configure(ConnectorOptions::default()).is_err());
        let mut options = pull_only();
        options.update_frequency = 10.0;
        options.enable_logging = false;
        connector.configure(options.clone()).unwrap();
        assert_eq!(connector.options(), options);
    }

    #[test]
    fn pull_errors_drop_back_to_connecting() {
        let connector = TransportConnector::new(StateManager::default(), pull_only()).unwrap();
        let sink = SessionSink {
            shared: Arc::downgrade(&connector.shared),
            generation: 0,
        };

        sink.opened(DataSource::Pull);
        assert_eq!(connector.status(), ConnectionStatus::Connected);

        sink.transport_error(DataSource::Pull, &TransportError::Timeout(Duration::from_millis(200)));
        assert_eq!(connector.status(), ConnectionStatus::Connecting);
        assert!(!connector.is_healthy());
        let meta = connector.state().get_current_state().metadata;
        assert_eq!(meta.connection_status, ConnectionStatus::Connecting);
        assert_eq!(meta.error_count, Some(1));

        sink.opened(DataSource::Pull);
        assert_eq!(connector.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_a_session_that_ignores_cancellation() {
        let token = CancellationToken::new();
        let task = tokio::spawn(std::future::pending::<()>());
        let handle = task.abort_handle();

        Session {
            token: token.clone(),
            task,
        }
        .stop();
        assert!(token.is_cancelled());
        sleep(SESSION_STOP_GRACE / 2).await;
        assert!(!handle.is_finished());

        sleep(SESSION_STOP_GRACE).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(handle.is_finished());
    }
}
