//! # Push WebSocket Ingestor
//!
//! One WebSocket session against the push endpoint. The handshake is bounded
//! by the request timeout. Once open, a heartbeat envelope is sent on every
//! interval and a watchdog ends the session if nothing arrives for the
//! silent timeout, which catches sockets that died without a close frame.
//!
//! Reconnecting is the caller's job: `run` returns when the session ends.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval_at, sleep_until, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::TelemetrySink;
use crate::errors::TransportError;
use crate::model::{DataSource, PushEnvelope, PushMessageKind};

#[derive(Debug, Clone, PartialEq)]
pub struct PushConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// `None` disables the watchdog.
    pub silent_timeout: Option<Duration>,
}

/// Checks that `raw` is an absolute `ws://` or `wss://` URL.
pub fn parse_push_url(raw: &str) -> Result<Url, TransportError> {
    let url = Url::parse(raw).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(TransportError::InvalidUrl(format!(
            "{}: unsupported scheme `{}`",
            raw, other
        ))),
    }
}

pub struct PushSession {
    config: PushConfig,
}

impl PushSession {
    pub fn new(config: PushConfig) -> Self {
        Self { config }
    }

    /// Runs one session to completion.
    ///
    /// Returns `Ok(())` only when `token` is cancelled. Every other ending
    /// (handshake failure or timeout, protocol error, close frame, silence)
    /// is an error.
    pub async fn run<S>(&self, sink: &S, token: &CancellationToken) -> Result<(), TransportError>
    where
        S: TelemetrySink + ?Sized,
    {
        let url = parse_push_url(&self.config.url)?;
        let handshake = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            result = timeout(self.config.connect_timeout, connect_async(url.as_str())) => result,
        };
        let (ws_stream, _) = match handshake {
            Err(_) => return Err(TransportError::Timeout(self.config.connect_timeout)),
            Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
            Ok(Ok(pair)) => pair,
        };

        tracing::debug!(url = %url, "push transport open");
        sink.opened(DataSource::Push);

        let (mut write, mut read) = ws_stream.split();
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        let silent = self.config.silent_timeout;
        let mut last_activity = Instant::now();

        loop {
            let silence_deadline = last_activity + silent.unwrap_or(Duration::from_secs(86_400));
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    let frame = serde_json::to_string(&PushEnvelope::heartbeat())
                        .map_err(|e| TransportError::Protocol(e.to_string()))?;
                    write
                        .send(Message::Text(frame.into()))
                        .await
                        .map_err(|e| TransportError::Protocol(e.to_string()))?;
                    tracing::trace!("heartbeat sent");
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_activity = Instant::now();
                            decode_frame(text.as_str(), sink);
                        }
                        Some(Ok(Message::Binary(bin))) => {
                            last_activity = Instant::now();
                            match std::str::from_utf8(&bin) {
                                Ok(text) => decode_frame(text, sink),
                                Err(_) => sink.rejected_frame(DataSource::Push, "binary frame is not UTF-8".into()),
                            }
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                            last_activity = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::debug!(?frame, "push transport closed by server");
                            return Err(TransportError::UnexpectedClose);
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(TransportError::Protocol(e.to_string())),
                        None => return Err(TransportError::UnexpectedClose),
                    }
                }
                _ = sleep_until(silence_deadline), if silent.is_some() => {
                    let waited = silent.unwrap_or_default();
                    tracing::warn!(silent_ms = waited.as_millis() as u64, "push transport silent, dropping session");
                    return Err(TransportError::Timeout(waited));
                }
            }
        }
    }
}

/// Parses one text frame. Malformed JSON and unknown message types are
/// reported and skipped; they never end the session.
fn decode_frame<S: TelemetrySink + ?Sized>(text: &str, sink: &S) {
    match serde_json::from_str::<PushEnvelope>(text) {
        Ok(envelope) => sink.push_message(envelope),
        Err(err) => {
            let kind = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string));
            match kind {
                Some(kind) if serde_json::from_value::<PushMessageKind>(kind.clone().into()).is_err() => {
                    tracing::warn!(%kind, "ignoring push message of unknown type");
                }
                _ => sink.rejected_frame(DataSource::Push, err.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<PushEnvelope>>,
        rejected: Mutex<Vec<String>>,
    }

    impl TelemetrySink for Recorder {
        fn opened(&self, _: DataSource) {}
        fn push_message(&self, envelope: PushEnvelope) {
            self.messages.lock().unwrap().push(envelope);
        }
        fn pull_record(&self, _: Value) {}
        fn rejected_frame(&self, _: DataSource, reason: String) {
            self.rejected.lock().unwrap().push(reason);
        }
        fn transport_error(&self, _: DataSource, _: &TransportError) {}
    }

    #[test]
    fn accepts_only_websocket_schemes() {
        assert!(parse_push_url("ws://localhost:8765").is_ok());
        assert!(parse_push_url("wss://sensor.example/ws").is_ok());
        assert!(matches!(parse_push_url("http://localhost"), Err(TransportError::InvalidUrl(_))));
        assert!(matches!(parse_push_url("not a url"), Err(TransportError::InvalidUrl(_))));
    }

    #[test]
    fn unknown_types_are_skipped_and_garbage_is_rejected() {
        let sink = Recorder::default();
        decode_frame(r#"{"type":"heartbeat","timestamp":"2024-01-01T00:00:00Z"}"#, &sink);
        decode_frame(r#"{"type":"calibration","data":{}}"#, &sink);
        decode_frame("{{nope", &sink);

        assert_eq!(sink.messages.lock().unwrap().len(), 1);
        assert_eq!(sink.rejected.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_url_fails_without_connecting() {
        let session = PushSession::new(PushConfig {
            url: "ftp://example".into(),
            connect_timeout: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(1),
            silent_timeout: None,
        });
        let result = session.run(&Recorder::default(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }
}
