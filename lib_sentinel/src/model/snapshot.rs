//! # Canonical Snapshot
//!
//! The single normalized state value shared with every consumer. A snapshot is
//! immutable once published: the state manager builds a new one per flush and
//! hands out `Arc<Snapshot>` clones, so all subscribers of one flush observe the
//! exact same value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Number of alert items kept in `alerts.recentAlerts` unless configured otherwise.
pub const MAX_RECENT_ALERTS: usize = 10;

/// Upper bound for scores and percentage-like fields.
pub const PERCENT_MAX: u8 = 100;

/// Operating mode reported by the sensor head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerMode {
    #[default]
    Idle,
    Active,
    Alert,
}

/// Link state of the camera feeding the detection pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraStatus {
    Connected,
    #[default]
    Lost,
}

/// Zone classification of a track, ordered by increasing severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Zone {
    #[default]
    Public,
    Perimeter,
    Restricted,
    Critical,
}

/// Threat level assigned upstream to a track, ordered by increasing severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThreatLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// `High` or `Critical`.
    pub fn is_severe(self) -> bool {
        self >= ThreatLevel::High
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrajectoryStability {
    #[default]
    Stable,
    Moderate,
    Erratic,
}

/// Bucketed confidence of a trajectory prediction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictionConfidence {
    High,
    Medium,
    #[default]
    Low,
}

impl PredictionConfidence {
    /// Buckets a 0..1 confidence: `>= 0.8` High, `>= 0.5` Medium, otherwise Low.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.8 {
            PredictionConfidence::High
        } else if ratio >= 0.5 {
            PredictionConfidence::Medium
        } else {
            PredictionConfidence::Low
        }
    }
}

/// Severity of a single alert item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    #[default]
    Info,
    Warning,
    Critical,
}

/// Overall alert level. Always derived, never set by hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    #[default]
    Normal,
    Elevated,
    High,
    Critical,
}

impl AlertLevel {
    /// Derives the overall level from the current alert items and tracks.
    ///
    /// Ordered rules, first match wins:
    /// 1. any critical alert, or more than two high/critical tracks → `Critical`
    /// 2. any high/critical track, or more than two warning alerts → `High`
    /// 3. any track, or any warning alert → `Elevated`
    /// 4. otherwise → `Normal`
    pub fn derive(alerts: &[AlertItem], intruders: &[Intruder]) -> Self {
        let critical_alerts = alerts
            .iter()
            .filter(|a| a.severity == AlertSeverity::Critical)
            .count();
        let warning_alerts = alerts
            .iter()
            .filter(|a| a.severity == AlertSeverity::Warning)
            .count();
        let severe_tracks = intruders
            .iter()
            .filter(|i| i.threat_level.is_severe())
            .count();

        if critical_alerts > 0 || severe_tracks > 2 {
            AlertLevel::Critical
        } else if severe_tracks > 0 || warning_alerts > 2 {
            AlertLevel::High
        } else if !intruders.is_empty() || warning_alerts > 0 {
            AlertLevel::Elevated
        } else {
            AlertLevel::Normal
        }
    }

    /// Operator guidance for this level and the current track count.
    pub fn recommendation(self, track_count: usize) -> String {
        match self {
            AlertLevel::Critical => format!(
                "IMMEDIATE ACTION: {} intruder(s) detected. Dispatch security response.",
                track_count
            ),
            AlertLevel::High => format!(
                "HIGH ALERT: Monitor {} tracked target(s) and prepare response.",
                track_count
            ),
            AlertLevel::Elevated if track_count == 0 => "CAUTION: Review active warnings.".to_string(),
            AlertLevel::Elevated => format!("CAUTION: {} target(s) under observation.", track_count),
            AlertLevel::Normal => "All clear. No active threats detected.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoSource {
    Webcam,
    Rtsp,
    Mjpeg,
    #[default]
    Offline,
}

/// Connection state of the transport feeding this snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    #[default]
    Disconnected,
}

/// Which transport produced the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Push,
    Pull,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemStatus {
    pub power_mode: PowerMode,
    pub power_draw: f64,
    pub battery_minutes: f64,
    pub frame_rate: f64,
    pub processing_status: String,
    pub camera_status: CameraStatus,
    /// Display timestamp (`HH:MM:SS`) of the last telemetry frame.
    pub last_update: String,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            power_mode: PowerMode::Idle,
            power_draw: 0.0,
            battery_minutes: 0.0,
            frame_rate: 0.0,
            processing_status: "Offline".to_string(),
            camera_status: CameraStatus::Lost,
            last_update: "--:--:--".to_string(),
        }
    }
}

/// One tracked entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Intruder {
    /// `TRK-###`
    pub id: String,
    pub zone: Zone,
    /// Always within `0..=100`.
    pub threat_score: u8,
    pub threat_level: ThreatLevel,
    /// Seconds since first detection.
    pub detection_time: f64,
}

/// Signed contribution of one factor to a threat score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreatFactor {
    pub factor: String,
    pub score: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorAnalysis {
    pub loitering: bool,
    pub loitering_duration: Option<f64>,
    pub speed_anomaly: bool,
    pub trajectory_stability: TrajectoryStability,
    /// Percentage, `0..=100`.
    pub trajectory_confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Prediction {
    pub near_term: String,
    pub medium_term: String,
    pub far_term: String,
    pub confidence: PredictionConfidence,
    pub will_enter_restricted: bool,
}

impl Default for Prediction {
    fn default() -> Self {
        Self {
            near_term: "Unknown".to_string(),
            medium_term: "Unknown".to_string(),
            far_term: "Unknown".to_string(),
            confidence: PredictionConfidence::Low,
            will_enter_restricted: false,
        }
    }
}

/// Detailed analysis attached to a track, keyed by its identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreatDetail {
    pub contributions: Vec<ThreatFactor>,
    pub behavior: BehaviorAnalysis,
    pub prediction: Prediction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertItem {
    pub id: String,
    pub timestamp: String,
    pub message: String,
    pub severity: AlertSeverity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertSummary {
    pub alert_level: AlertLevel,
    pub recommendation: String,
    pub recent_alerts: Vec<AlertItem>,
}

impl Default for AlertSummary {
    fn default() -> Self {
        Self {
            alert_level: AlertLevel::Normal,
            recommendation: AlertLevel::Normal.recommendation(0),
            recent_alerts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoStatus {
    pub is_live: bool,
    pub resolution: String,
    pub latency_ms: f64,
    pub source: VideoSource,
    pub stream_url: Option<String>,
    pub frame_rate: Option<f64>,
    pub bitrate: Option<f64>,
}

impl Default for VideoStatus {
    fn default() -> Self {
        Self {
            is_live: false,
            resolution: "N/A".to_string(),
            latency_ms: 0.0,
            source: VideoSource::Offline,
            stream_url: None,
            frame_rate: None,
            bitrate: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    pub last_updated: DateTime<Utc>,
    pub connection_status: ConnectionStatus,
    pub data_source: DataSource,
    /// Accepted updates per second over the tracking window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u64>,
}

/// The canonical snapshot.
///
/// `Snapshot::default()` is the documented offline state: disconnected, empty
/// collections, `Idle` power mode, `Lost` camera and `Normal` alert level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub system_status: SystemStatus,
    pub intruders: Vec<Intruder>,
    pub threat_intelligence: BTreeMap<String, ThreatDetail>,
    pub alerts: AlertSummary,
    pub video_status: VideoStatus,
    pub metadata: Metadata,
}

impl Snapshot {
    /// Re-establishes every snapshot invariant in place:
    /// numeric bounds, unique track ids, no orphaned threat intelligence,
    /// a bounded alert list, and an alert level derived from its inputs.
    pub fn normalize(&mut self, max_recent_alerts: usize) {
        let sys = &mut self.system_status;
        sys.power_draw = non_negative(sys.power_draw);
        sys.battery_minutes = non_negative(sys.battery_minutes);
        sys.frame_rate = non_negative(sys.frame_rate);

        let mut seen = HashSet::new();
        self.intruders.retain(|i| seen.insert(i.id.clone()));
        for intruder in &mut self.intruders {
            intruder.threat_score = intruder.threat_score.min(PERCENT_MAX);
            intruder.detection_time = non_negative(intruder.detection_time);
        }

        self.prune_orphans();
        for detail in self.threat_intelligence.values_mut() {
            let behavior = &mut detail.behavior;
            behavior.trajectory_confidence = behavior.trajectory_confidence.min(PERCENT_MAX);
            behavior.loitering_duration = behavior.loitering_duration.map(non_negative);
        }

        let recent = &mut self.alerts.recent_alerts;
        if recent.len() > max_recent_alerts {
            let excess = recent.len() - max_recent_alerts;
            recent.drain(..excess);
        }
        self.alerts.alert_level = AlertLevel::derive(&self.alerts.recent_alerts, &self.intruders);
        self.alerts.recommendation = self.alerts.alert_level.recommendation(self.intruders.len());

        let video = &mut self.video_status;
        video.latency_ms = non_negative(video.latency_ms);
        video.frame_rate = video.frame_rate.map(non_negative);
        video.bitrate = video.bitrate.map(non_negative);
    }

    /// Drops threat-intelligence entries whose track is no longer present.
    /// Returns how many were removed.
    pub fn prune_orphans(&mut self) -> usize {
        let live: HashSet<&str> = self.intruders.iter().map(|i| i.id.as_str()).collect();
        let before = self.threat_intelligence.len();
        self.threat_intelligence.retain(|id, _| live.contains(id.as_str()));
        before - self.threat_intelligence.len()
    }
}

/// Clamps to `>= 0`, mapping non-finite values to 0.
pub fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
