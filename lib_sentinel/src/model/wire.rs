//! Transport envelopes as they arrive from the detection backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message kinds carried by the push transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushMessageKind {
    SystemUpdate,
    TrackUpdate,
    Alert,
    Heartbeat,
}

/// `{ type, timestamp, data }` frame received over the push transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: PushMessageKind,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl PushEnvelope {
    /// The client heartbeat sent periodically while connected via push.
    pub fn heartbeat() -> Self {
        Self {
            kind: PushMessageKind::Heartbeat,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            data: Value::Null,
        }
    }
}

/// `{ success, timestamp, data?, error?, version? }` body returned by the pull transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullEnvelope {
    pub success: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}
