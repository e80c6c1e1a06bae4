//! Connector configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigError;

/// Slowest accepted poll rate: one fetch every 1000 s.
pub const MIN_UPDATE_FREQUENCY: f64 = 0.001;
/// Fastest accepted poll rate: one fetch per millisecond.
pub const MAX_UPDATE_FREQUENCY: f64 = 1_000.0;
/// Ceiling for every millisecond option (one day).
pub const MAX_DURATION_MS: u64 = 86_400_000;

/// Options accepted by [`TransportConnector`](super::TransportConnector).
///
/// Serialized in camelCase so hosts can load it straight from a JSON config.
/// Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectorOptions {
    /// `ws://` or `wss://` endpoint of the push transport.
    pub push_url: Option<String>,
    /// `http://` or `https://` endpoint of the pull transport.
    pub pull_url: Option<String>,
    pub prefer_push: bool,
    /// Pull polls per second.
    pub update_frequency: f64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Bounds a push handshake and each pull fetch.
    pub request_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// A push session with no inbound frame for this long is considered dead. 0 disables.
    pub silent_timeout_ms: u64,
    /// Extra attempts for transient pull failures, inside the request timeout.
    pub pull_retries: u32,
    pub pull_auth_token: Option<String>,
    /// Delay before auto-disconnecting after the last unsubscribe.
    pub linger_ms: u64,
    pub enable_logging: bool,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            push_url: None,
            pull_url: None,
            prefer_push: true,
            update_frequency: 5.0,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            request_timeout_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            silent_timeout_ms: 60_000,
            pull_retries: 1,
            pull_auth_token: None,
            linger_ms: 0,
            enable_logging: true,
        }
    }
}

impl ConnectorOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.push_url.is_none() && self.pull_url.is_none() {
            return Err(ConfigError::NoTransport);
        }
        if !(MIN_UPDATE_FREQUENCY..=MAX_UPDATE_FREQUENCY).contains(&self.update_frequency) {
            return Err(ConfigError::Invalid {
                option: "updateFrequency",
                reason: format!(
                    "must be between {} and {} Hz, got {}",
                    MIN_UPDATE_FREQUENCY, MAX_UPDATE_FREQUENCY, self.update_frequency
                ),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                option: "requestTimeoutMs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                option: "heartbeatIntervalMs",
                reason: "must be greater than zero".into(),
            });
        }
        for (option, value) in [
            ("requestTimeoutMs", self.request_timeout_ms),
            ("heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("silentTimeoutMs", self.silent_timeout_ms),
            ("reconnectBaseDelayMs", self.reconnect_base_delay_ms),
            ("reconnectMaxDelayMs", self.reconnect_max_delay_ms),
            ("lingerMs", self.linger_ms),
        ] {
            if value > MAX_DURATION_MS {
                return Err(ConfigError::Invalid {
                    option,
                    reason: format!("must be at most {} ms, got {}", MAX_DURATION_MS, value),
                });
            }
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(ConfigError::Invalid {
                option: "reconnectMaxDelayMs",
                reason: "must not be below reconnectBaseDelayMs".into(),
            });
        }
        Ok(())
    }

    /// `true` if any field that shapes a running session differs.
    pub fn transport_changed(&self, other: &Self) -> bool {
        self.push_url != other.push_url
            || self.pull_url != other.pull_url
            || self.prefer_push != other.prefer_push
            || self.update_frequency != other.update_frequency
            || self.request_timeout_ms != other.request_timeout_ms
            || self.heartbeat_interval_ms != other.heartbeat_interval_ms
            || self.silent_timeout_ms != other.silent_timeout_ms
            || self.pull_retries != other.pull_retries
            || self.pull_auth_token != other.pull_auth_token
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn silent_timeout(&self) -> Option<Duration> {
        (self.silent_timeout_ms > 0).then(|| Duration::from_millis(self.silent_timeout_ms))
    }

    /// `1000 / updateFrequency` ms, clamped to the accepted frequency range
    /// so unvalidated options never yield a zero or unrepresentable period.
    pub fn poll_interval(&self) -> Duration {
        let hz = if self.update_frequency.is_nan() {
            MIN_UPDATE_FREQUENCY
        } else {
            self.update_frequency.clamp(MIN_UPDATE_FREQUENCY, MAX_UPDATE_FREQUENCY)
        };
        Duration::try_from_secs_f64(1.0 / hz).unwrap_or(Duration::from_millis(MAX_DURATION_MS))
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_pull() -> ConnectorOptions {
        ConnectorOptions {
            pull_url: Some("http://127.0.0.1:8000/api/telemetry".into()),
            ..Default::default()
        }
    }

    #[test]
    fn needs_at_least_one_transport() {
        assert_eq!(ConnectorOptions::default().validate(), Err(ConfigError::NoTransport));
        assert!(with_pull().validate().is_ok());
    }

    #[test]
    fn rejects_bad_frequency_and_timeout() {
        for hz in [0.0, -2.0, f64::NAN, f64::INFINITY, 1e-300, 1e9] {
            let opts = ConnectorOptions {
                update_frequency: hz,
                ..with_pull()
            };
            assert!(opts.validate().is_err(), "{hz}");
        }
        let opts = ConnectorOptions {
            request_timeout_ms: 0,
            ..with_pull()
        };
        assert!(matches!(
            opts.validate(),
            Err(ConfigError::Invalid { option: "requestTimeoutMs", .. })
        ));
    }

    #[test]
    fn rejects_durations_past_a_day() {
        let opts = ConnectorOptions {
            silent_timeout_ms: u64::MAX,
            ..with_pull()
        };
        assert!(matches!(
            opts.validate(),
            Err(ConfigError::Invalid { option: "silentTimeoutMs", .. })
        ));
        let opts = ConnectorOptions {
            reconnect_base_delay_ms: MAX_DURATION_MS + 1,
            reconnect_max_delay_ms: MAX_DURATION_MS + 1,
            ..with_pull()
        };
        assert!(opts.validate().is_err());
        let opts = ConnectorOptions {
            silent_timeout_ms: MAX_DURATION_MS,
            update_frequency: MAX_UPDATE_FREQUENCY,
            ..with_pull()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn poll_interval_is_never_zero_or_unbounded() {
        for (hz, expected) in [
            (1e-300, Duration::from_secs(1_000)),
            (1e12, Duration::from_millis(1)),
            (f64::NAN, Duration::from_secs(1_000)),
        ] {
            let opts = ConnectorOptions {
                update_frequency: hz,
                ..with_pull()
            };
            assert_eq!(opts.poll_interval(), expected, "{hz}");
        }
    }

    #[test]
    fn poll_interval_follows_frequency() {
        let opts = ConnectorOptions {
            update_frequency: 4.0,
            ..with_pull()
        };
        assert_eq!(opts.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn parses_camel_case_with_defaults() {
        let opts: ConnectorOptions = serde_json::from_value(json!({
            "pushUrl": "ws://localhost:8765",
            "preferPush": false,
            "maxReconnectAttempts": 2
        }))
        .unwrap();
        assert_eq!(opts.push_url.as_deref(), Some("ws://localhost:8765"));
        assert!(!opts.prefer_push);
        assert_eq!(opts.max_reconnect_attempts, 2);
        assert_eq!(opts.request_timeout_ms, 5_000);
    }

    #[test]
    fn detects_transport_changes() {
        let base = with_pull();
        let mut other = base.clone();
        other.enable_logging = false;
        assert!(!base.transport_changed(&other));
        other.update_frequency = 10.0;
        assert!(base.transport_changed(&other));
    }
}
