//! # Data Transformer
//!
//! Converts a raw telemetry record into a canonical [`Snapshot`].
//!
//! The pipeline is `validate -> sanitize -> map -> normalize`. [`DataTransformer::transform`]
//! never fails: invalid input yields the documented default snapshot and a
//! warning. Use [`DataTransformer::try_transform`] when the caller needs to know
//! why a record was rejected.

use chrono::Utc;
use serde_json::Value;

use crate::errors::ValidationError;
use crate::model::{AlertItem, AlertLevel, ConnectionStatus, DataSource, Intruder, Snapshot, MAX_RECENT_ALERTS};
use crate::schema::validate_record;

/// Field-level mapping from sanitized records.
pub mod mapping;
/// Best-effort coercion of raw records.
pub mod sanitize;

pub use sanitize::sanitize_record;

/// Derives the overall alert level. See [`AlertLevel::derive`].
pub fn derive_alert_level(alerts: &[AlertItem], intruders: &[Intruder]) -> AlertLevel {
    AlertLevel::derive(alerts, intruders)
}

/// Operator guidance text. See [`AlertLevel::recommendation`].
pub fn recommendation_for(level: AlertLevel, track_count: usize) -> String {
    level.recommendation(track_count)
}

#[derive(Debug, Clone)]
pub struct DataTransformer {
    source: DataSource,
    max_recent_alerts: usize,
}

impl Default for DataTransformer {
    fn default() -> Self {
        Self::new(DataSource::Push)
    }
}

impl DataTransformer {
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            max_recent_alerts: MAX_RECENT_ALERTS,
        }
    }

    pub fn with_max_recent_alerts(mut self, max: usize) -> Self {
        self.max_recent_alerts = max;
        self
    }

    /// The data source stamped into `metadata.dataSource` of produced snapshots.
    pub fn source(&self) -> DataSource {
        self.source
    }

    pub fn set_source(&mut self, source: DataSource) {
        self.source = source;
    }

    pub fn validate(&self, raw: &Value) -> bool {
        validate_record(raw).is_ok()
    }

    pub fn sanitize(&self, raw: &Value) -> Value {
        sanitize_record(raw)
    }

    /// Transforms a record, falling back to `Snapshot::default()` when it is invalid.
    pub fn transform(&self, raw: &Value) -> Snapshot {
        match self.try_transform(raw) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(field = err.field(), error = %err, "invalid telemetry record, using default snapshot");
                Snapshot::default()
            }
        }
    }

    /// Transforms a record, reporting the first schema violation instead of
    /// substituting the default snapshot.
    pub fn try_transform(&self, raw: &Value) -> Result<Snapshot, ValidationError> {
        validate_record(raw)?;
        let clean = sanitize_record(raw);
        // Sanitizing only rewrites sections in place, so the shape still validates.
        validate_record(&clean)?;

        let record_timestamp = clean.get("timestamp").and_then(Value::as_str);
        let empty = Vec::new();
        let tracks = clean["tracks"].as_array().unwrap_or(&empty);
        let alerts = clean["alerts"].as_array().unwrap_or(&empty);

        let (intruders, threat_intelligence) = mapping::map_tracks(tracks);
        let mut snapshot = Snapshot {
            system_status: mapping::map_system(&clean["system"], record_timestamp),
            intruders,
            threat_intelligence,
            video_status: mapping::map_video(clean.get("video")),
            ..Snapshot::default()
        };
        snapshot.alerts.recent_alerts = mapping::map_alerts(alerts, self.max_recent_alerts);
        snapshot.metadata.last_updated = Utc::now();
        snapshot.metadata.connection_status = ConnectionStatus::Connected;
        snapshot.metadata.data_source = self.source;

        snapshot.normalize(self.max_recent_alerts);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CameraStatus, PowerMode, ThreatLevel, Zone};
    use serde_json::json;

    fn record() -> Value {
        json!({
            "timestamp": "2024-05-01T12:30:45Z",
            "system": {
                "power_mode": "active",
                "power_draw": 4.2,
                "battery_minutes": 310,
                "fps": 15,
                "camera_status": true
            },
            "tracks": [{
                "id": 7,
                "zone": "restricted",
                "threat_score": 82,
                "threat_level": "high",
                "detection_time": 12.5,
                "behavior": {"loitering": true, "loitering_duration": 40, "trajectory_stability": "erratic", "trajectory_confidence": 0.73},
                "prediction": {"near_term": "approach gate", "confidence": 0.9, "will_enter_restricted": true},
                "explanation": [{"factor": "zone", "points": 30}, {"factor": "speed", "points": -4.6}]
            }],
            "alerts": [{"time": "12:30:40", "message": "Track 7 in restricted zone", "level": "warning"}],
            "video": {"live": true, "resolution": {"width": 640, "height": 480}, "latency_ms": 120, "source": "webcam"}
        })
    }

    #[test]
    fn maps_a_full_record() {
        let snap = DataTransformer::new(DataSource::Pull).transform(&record());

        assert_eq!(snap.system_status.power_mode, PowerMode::Active);
        assert_eq!(snap.system_status.camera_status, CameraStatus::Connected);
        assert_eq!(snap.system_status.processing_status, "Processing");
        assert_eq!(snap.system_status.last_update, "12:30:45");

        assert_eq!(snap.intruders.len(), 1);
        let intruder = &snap.intruders[0];
        assert_eq!(intruder.id, "TRK-007");
        assert_eq!(intruder.zone, Zone::Restricted);
        assert_eq!(intruder.threat_level, ThreatLevel::High);

        let detail = &snap.threat_intelligence["TRK-007"];
        assert_eq!(detail.behavior.trajectory_confidence, 73);
        assert_eq!(detail.contributions[1].score, -5);
        assert!(detail.prediction.will_enter_restricted);

        assert_eq!(snap.alerts.alert_level, AlertLevel::High);
        assert_eq!(snap.alerts.recent_alerts[0].id, "ALT-0-12:30:40");
        assert_eq!(snap.video_status.resolution, "640x480");
        assert_eq!(snap.metadata.connection_status, ConnectionStatus::Connected);
        assert_eq!(snap.metadata.data_source, DataSource::Pull);
    }

    #[test]
    fn threat_scores_are_clamped() {
        let raw = json!({
            "system": {},
            "tracks": [{"id": 1, "threat_score": -50}, {"id": 2, "threat_score": 150}],
            "alerts": []
        });
        let snap = DataTransformer::default().transform(&raw);
        assert_eq!(snap.intruders[0].threat_score, 0);
        assert_eq!(snap.intruders[1].threat_score, 100);
    }

    #[test]
    fn duplicate_track_ids_keep_first() {
        let raw = json!({
            "system": {},
            "tracks": [{"id": 3, "zone": "critical"}, {"id": 3, "zone": "public"}],
            "alerts": []
        });
        let snap = DataTransformer::default().transform(&raw);
        assert_eq!(snap.intruders.len(), 1);
        assert_eq!(snap.intruders[0].zone, Zone::Critical);
        assert_eq!(snap.threat_intelligence.len(), 1);
    }

    #[test]
    fn never_panics_on_garbage() {
        let transformer = DataTransformer::default();
        let inputs = [
            json!(null),
            json!({}),
            json!([]),
            json!("str"),
            json!(123),
            json!({"system": "x", "tracks": 1, "alerts": {}}),
            json!({"system": {"fps": "fast", "power_mode": 9}, "tracks": [null, {"id": "abc"}], "alerts": [1]}),
        ];
        for raw in inputs {
            let direct = transformer.transform(&raw);
            let cleaned = transformer.transform(&transformer.sanitize(&raw));
            for snap in [direct, cleaned] {
                assert!(snap.intruders.iter().all(|i| i.threat_score <= 100));
                assert!(snap
                    .intruders
                    .iter()
                    .all(|i| snap.threat_intelligence.contains_key(&i.id)));
                assert!(snap.system_status.frame_rate.is_finite());
            }
        }
    }

    #[test]
    fn invalid_input_yields_default_snapshot() {
        let transformer = DataTransformer::default();
        assert_eq!(transformer.transform(&json!({"system": {}})), Snapshot::default());
        assert!(!transformer.validate(&json!([])));
        assert!(transformer.try_transform(&json!({"system": {}, "tracks": []})).is_err());
    }

    #[test]
    fn alert_list_is_bounded() {
        let alerts: Vec<Value> = (0..25)
            .map(|i| json!({"id": format!("A{}", i), "time": "t", "message": "m"}))
            .collect();
        let raw = json!({"system": {}, "tracks": [], "alerts": alerts});
        let snap = DataTransformer::default().transform(&raw);
        assert_eq!(snap.alerts.recent_alerts.len(), MAX_RECENT_ALERTS);
        assert_eq!(snap.alerts.recent_alerts.last().unwrap().id, "A24");

        let narrow = DataTransformer::default().with_max_recent_alerts(3).transform(&raw);
        assert_eq!(narrow.alerts.recent_alerts.len(), 3);
    }
}
