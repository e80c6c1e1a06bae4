//! Best-effort cleaning of a raw telemetry record.
//!
//! Runs regardless of the validator's verdict. Numbers are coerced (non-numeric
//! becomes 0), missing enum-like fields get their documented default, and
//! nested entries that are not objects are dropped. Sections that are present
//! but of the wrong kind are left untouched so the validator still sees them.

use serde_json::{json, Map, Value};

use crate::schema::is_record_entry;

/// Coerces a JSON value to a finite number. Missing, `null`, non-numeric
/// strings and non-finite values become `0.0`; booleans become 1/0.
pub fn coerce_number(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

/// Like [`coerce_number`] but keeps absence: `None` for missing or `null`.
pub fn coerce_optional_number(value: Option<&Value>) -> Option<f64> {
    match value {
        None | Some(Value::Null) => None,
        other => Some(coerce_number(other)),
    }
}

/// Truthiness for flag-like fields.
pub fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        _ => false,
    }
}

/// Text for string-like fields; numbers are rendered, anything else is absent.
pub fn coerce_text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn enum_text(value: Option<&Value>, default: &str) -> Value {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Value::String(s.trim().to_ascii_lowercase()),
        Some(Value::Number(n)) => Value::Number(n.clone()),
        _ => Value::String(default.to_string()),
    }
}

fn insert_optional_text(out: &mut Map<String, Value>, key: &str, value: Option<&Value>) {
    if let Some(text) = coerce_text(value) {
        out.insert(key.to_string(), Value::String(text));
    }
}

fn insert_optional_number(out: &mut Map<String, Value>, key: &str, value: Option<&Value>) {
    if let Some(n) = coerce_optional_number(value) {
        out.insert(key.to_string(), json!(n));
    }
}

/// Sanitizes a whole record. Non-object input yields `Value::Null`.
pub fn sanitize_record(raw: &Value) -> Value {
    let Some(record) = raw.as_object() else {
        return Value::Null;
    };

    let mut out = record.clone();
    if let Some(Value::Object(system)) = record.get("system") {
        out.insert("system".into(), sanitize_system(system));
    }
    if let Some(Value::Array(tracks)) = record.get("tracks") {
        let cleaned = tracks
            .iter()
            .filter(|t| is_record_entry(t))
            .filter_map(Value::as_object)
            .map(sanitize_track)
            .collect();
        out.insert("tracks".into(), Value::Array(cleaned));
    }
    if let Some(Value::Array(alerts)) = record.get("alerts") {
        let cleaned = alerts
            .iter()
            .filter(|a| is_record_entry(a))
            .filter_map(Value::as_object)
            .map(sanitize_alert)
            .collect();
        out.insert("alerts".into(), Value::Array(cleaned));
    }
    if let Some(Value::Object(video)) = record.get("video") {
        out.insert("video".into(), sanitize_video(video));
    }
    Value::Object(out)
}

fn sanitize_system(system: &Map<String, Value>) -> Value {
    let mut out = Map::new();
    out.insert("power_mode".into(), enum_text(system.get("power_mode"), "idle"));
    out.insert("power_draw".into(), json!(coerce_number(system.get("power_draw"))));
    out.insert(
        "battery_minutes".into(),
        json!(coerce_number(system.get("battery_minutes"))),
    );
    out.insert("fps".into(), json!(coerce_number(system.get("fps"))));
    let camera = match system.get("camera_status") {
        Some(v @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => v.clone(),
        _ => Value::String("lost".into()),
    };
    out.insert("camera_status".into(), camera);
    insert_optional_text(&mut out, "processing_status", system.get("processing_status"));
    insert_optional_text(&mut out, "timestamp", system.get("timestamp"));
    Value::Object(out)
}

fn sanitize_track(track: &Map<String, Value>) -> Value {
    let empty = Map::new();
    let behavior = track.get("behavior").and_then(Value::as_object).unwrap_or(&empty);
    let prediction = track.get("prediction").and_then(Value::as_object).unwrap_or(&empty);

    let mut behavior_out = Map::new();
    behavior_out.insert("loitering".into(), json!(coerce_bool(behavior.get("loitering"))));
    insert_optional_number(
        &mut behavior_out,
        "loitering_duration",
        behavior.get("loitering_duration"),
    );
    behavior_out.insert(
        "speed_anomaly".into(),
        json!(coerce_bool(behavior.get("speed_anomaly"))),
    );
    behavior_out.insert(
        "trajectory_stability".into(),
        enum_text(behavior.get("trajectory_stability"), "stable"),
    );
    behavior_out.insert(
        "trajectory_confidence".into(),
        json!(coerce_number(behavior.get("trajectory_confidence"))),
    );

    let horizon = |key: &str| coerce_text(prediction.get(key)).unwrap_or_else(|| "Unknown".to_string());
    let prediction_out = json!({
        "near_term": horizon("near_term"),
        "medium_term": horizon("medium_term"),
        "far_term": horizon("far_term"),
        "confidence": coerce_number(prediction.get("confidence")),
        "will_enter_restricted": coerce_bool(prediction.get("will_enter_restricted")),
    });

    let explanation: Vec<Value> = track
        .get("explanation")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|item| {
                    json!({
                        "factor": coerce_text(item.get("factor")).unwrap_or_else(|| "unknown".to_string()),
                        "points": coerce_number(item.get("points")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "id": coerce_number(track.get("id")),
        "zone": enum_text(track.get("zone"), "public"),
        "threat_score": coerce_number(track.get("threat_score")),
        "threat_level": enum_text(track.get("threat_level"), "low"),
        "detection_time": coerce_number(track.get("detection_time")),
        "behavior": Value::Object(behavior_out),
        "prediction": prediction_out,
        "explanation": explanation,
    })
}

fn sanitize_alert(alert: &Map<String, Value>) -> Value {
    let mut out = Map::new();
    insert_optional_text(&mut out, "id", alert.get("id"));
    out.insert(
        "time".into(),
        Value::String(coerce_text(alert.get("time")).unwrap_or_default()),
    );
    out.insert(
        "message".into(),
        Value::String(coerce_text(alert.get("message")).unwrap_or_default()),
    );
    out.insert("level".into(), enum_text(alert.get("level"), "info"));
    Value::Object(out)
}

fn sanitize_video(video: &Map<String, Value>) -> Value {
    let mut out = Map::new();
    out.insert("live".into(), json!(coerce_bool(video.get("live"))));
    if let Some(Value::Object(res)) = video.get("resolution") {
        out.insert(
            "resolution".into(),
            json!({
                "width": coerce_number(res.get("width")),
                "height": coerce_number(res.get("height")),
            }),
        );
    }
    out.insert("latency_ms".into(), json!(coerce_number(video.get("latency_ms"))));
    out.insert("source".into(), enum_text(video.get("source"), "offline"));
    insert_optional_text(&mut out, "stream_url", video.get("stream_url"));
    insert_optional_number(&mut out, "fps", video.get("fps"));
    insert_optional_number(&mut out, "bitrate", video.get("bitrate"));
    Value::Object(out)
}
