//! Field mapping from a sanitized record into canonical sections.
//!
//! Every mapping follows the same discipline: read, fall back to the documented
//! default, clamp into range.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::sanitize::{coerce_bool, coerce_number, coerce_optional_number, coerce_text};
use crate::model::{
    non_negative, AlertItem, AlertSeverity, BehaviorAnalysis, CameraStatus, Intruder, PowerMode,
    Prediction, PredictionConfidence, SystemStatus, ThreatDetail, ThreatFactor, ThreatLevel,
    TrajectoryStability, VideoSource, VideoStatus, Zone, PERCENT_MAX,
};

fn lowered(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn power_mode(value: Option<&Value>) -> PowerMode {
    match lowered(value).as_str() {
        "active" => PowerMode::Active,
        "alert" => PowerMode::Alert,
        _ => PowerMode::Idle,
    }
}

/// Maps boolean-like link values onto the closed `Connected`/`Lost` enum.
pub fn camera_status(value: Option<&Value>) -> CameraStatus {
    let connected = match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "connected" | "online" | "ok" | "true" | "active" | "up"
        ),
        _ => false,
    };
    if connected {
        CameraStatus::Connected
    } else {
        CameraStatus::Lost
    }
}

/// Zone by name or by index `0..=3`.
pub fn zone(value: Option<&Value>) -> Zone {
    if let Some(Value::Number(n)) = value {
        return match n.as_f64().unwrap_or(0.0).round() as i64 {
            1 => Zone::Perimeter,
            2 => Zone::Restricted,
            i if i >= 3 => Zone::Critical,
            _ => Zone::Public,
        };
    }
    match lowered(value).as_str() {
        "perimeter" | "buffer" => Zone::Perimeter,
        "restricted" => Zone::Restricted,
        "critical" | "secure" => Zone::Critical,
        _ => Zone::Public,
    }
}

pub fn threat_level(value: Option<&Value>) -> ThreatLevel {
    match lowered(value).as_str() {
        "medium" | "moderate" => ThreatLevel::Medium,
        "high" => ThreatLevel::High,
        "critical" | "severe" => ThreatLevel::Critical,
        _ => ThreatLevel::Low,
    }
}

/// Free-text stability mapped onto `Stable`/`Moderate`/`Erratic`, `Stable` by default.
pub fn trajectory_stability(value: Option<&Value>) -> TrajectoryStability {
    let text = lowered(value);
    if text.contains("errat") || text.contains("unstable") {
        TrajectoryStability::Erratic
    } else if text.contains("moder") || text.contains("variable") {
        TrajectoryStability::Moderate
    } else {
        TrajectoryStability::Stable
    }
}

pub fn alert_severity(value: Option<&Value>) -> AlertSeverity {
    match lowered(value).as_str() {
        "critical" | "high" | "alert" | "danger" => AlertSeverity::Critical,
        "warning" | "warn" | "medium" => AlertSeverity::Warning,
        _ => AlertSeverity::Info,
    }
}

pub fn video_source(value: Option<&Value>) -> VideoSource {
    match lowered(value).as_str() {
        "webcam" | "camera" => VideoSource::Webcam,
        "rtsp" => VideoSource::Rtsp,
        "mjpeg" | "http" => VideoSource::Mjpeg,
        _ => VideoSource::Offline,
    }
}

/// `TRK-###` from an upstream numeric id. Negative ids map to `TRK-000`.
pub fn track_id(value: Option<&Value>) -> String {
    let raw = non_negative(coerce_number(value)).trunc() as u64;
    format!("TRK-{:03}", raw)
}

/// Rounds and clamps a score into `0..=100`.
pub fn percent(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, f64::from(PERCENT_MAX)) as u8
}

/// `HH:MM:SS` rendering of an RFC 3339 timestamp. Unparseable text is kept
/// verbatim; missing text falls back to the current time.
pub fn display_time(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(text) => match DateTime::parse_from_rfc3339(text) {
            Ok(ts) => ts.with_timezone(&Utc).format("%H:%M:%S").to_string(),
            Err(_) => text.to_string(),
        },
        None => Utc::now().format("%H:%M:%S").to_string(),
    }
}

pub fn map_system(system: &Value, record_timestamp: Option<&str>) -> SystemStatus {
    let mode = power_mode(system.get("power_mode"));
    let processing_status = coerce_text(system.get("processing_status"))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| {
            match mode {
                PowerMode::Idle => "Standby",
                PowerMode::Active => "Processing",
                PowerMode::Alert => "Threat Response",
            }
            .to_string()
        });
    let stamp = system
        .get("timestamp")
        .and_then(Value::as_str)
        .or(record_timestamp);

    SystemStatus {
        power_mode: mode,
        power_draw: non_negative(coerce_number(system.get("power_draw"))),
        battery_minutes: non_negative(coerce_number(system.get("battery_minutes"))),
        frame_rate: non_negative(coerce_number(system.get("fps"))),
        processing_status,
        camera_status: camera_status(system.get("camera_status")),
        last_update: display_time(stamp),
    }
}

fn map_behavior(behavior: Option<&Value>) -> BehaviorAnalysis {
    let Some(b) = behavior else {
        return BehaviorAnalysis::default();
    };
    BehaviorAnalysis {
        loitering: coerce_bool(b.get("loitering")),
        loitering_duration: coerce_optional_number(b.get("loitering_duration")).map(non_negative),
        speed_anomaly: coerce_bool(b.get("speed_anomaly")),
        trajectory_stability: trajectory_stability(b.get("trajectory_stability")),
        trajectory_confidence: percent(coerce_number(b.get("trajectory_confidence")) * 100.0),
    }
}

fn map_prediction(prediction: Option<&Value>) -> Prediction {
    let Some(p) = prediction else {
        return Prediction::default();
    };
    let horizon = |key: &str| coerce_text(p.get(key)).unwrap_or_else(|| "Unknown".to_string());
    Prediction {
        near_term: horizon("near_term"),
        medium_term: horizon("medium_term"),
        far_term: horizon("far_term"),
        confidence: PredictionConfidence::from_ratio(coerce_number(p.get("confidence"))),
        will_enter_restricted: coerce_bool(p.get("will_enter_restricted")),
    }
}

fn map_contributions(explanation: Option<&Value>) -> Vec<ThreatFactor> {
    explanation
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| ThreatFactor {
                    factor: coerce_text(item.get("factor")).unwrap_or_else(|| "unknown".to_string()),
                    score: coerce_number(item.get("points"))
                        .round()
                        .clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Maps the track list into intruders plus their threat intelligence.
/// The first occurrence of a formatted id wins.
pub fn map_tracks(tracks: &[Value]) -> (Vec<Intruder>, BTreeMap<String, ThreatDetail>) {
    let mut seen = HashSet::new();
    let mut intruders = Vec::with_capacity(tracks.len());
    let mut intel = BTreeMap::new();

    for track in tracks.iter().filter(|t| t.is_object()) {
        let id = track_id(track.get("id"));
        if !seen.insert(id.clone()) {
            tracing::debug!(track_id = %id, "dropping duplicate track");
            continue;
        }
        intruders.push(Intruder {
            id: id.clone(),
            zone: zone(track.get("zone")),
            threat_score: percent(coerce_number(track.get("threat_score"))),
            threat_level: threat_level(track.get("threat_level")),
            detection_time: non_negative(coerce_number(track.get("detection_time"))),
        });
        intel.insert(
            id,
            ThreatDetail {
                contributions: map_contributions(track.get("explanation")),
                behavior: map_behavior(track.get("behavior")),
                prediction: map_prediction(track.get("prediction")),
            },
        );
    }
    (intruders, intel)
}

/// Maps alert entries, keeping upstream order and only the newest `max` items.
pub fn map_alerts(alerts: &[Value], max: usize) -> Vec<AlertItem> {
    let items: Vec<AlertItem> = alerts
        .iter()
        .filter(|a| a.is_object())
        .enumerate()
        .map(|(index, alert)| {
            let time = coerce_text(alert.get("time")).unwrap_or_default();
            AlertItem {
                id: coerce_text(alert.get("id"))
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| format!("ALT-{}-{}", index, time)),
                timestamp: time,
                message: coerce_text(alert.get("message")).unwrap_or_default(),
                severity: alert_severity(alert.get("level")),
            }
        })
        .collect();
    let skip = items.len().saturating_sub(max);
    items.into_iter().skip(skip).collect()
}

pub fn map_video(video: Option<&Value>) -> VideoStatus {
    let Some(v) = video.filter(|v| v.is_object()) else {
        return VideoStatus::default();
    };
    let resolution = v
        .get("resolution")
        .filter(|r| r.is_object())
        .map(|r| {
            let width = non_negative(coerce_number(r.get("width"))) as u64;
            let height = non_negative(coerce_number(r.get("height"))) as u64;
            format!("{}x{}", width, height)
        })
        .unwrap_or_else(|| "N/A".to_string());

    VideoStatus {
        is_live: coerce_bool(v.get("live")),
        resolution,
        latency_ms: non_negative(coerce_number(v.get("latency_ms"))),
        source: video_source(v.get("source")),
        stream_url: coerce_text(v.get("stream_url")),
        frame_rate: coerce_optional_number(v.get("fps")).map(non_negative),
        bitrate: coerce_optional_number(v.get("bitrate")).map(non_negative),
    }
}
