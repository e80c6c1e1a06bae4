//! # Pull Polling Ingestor
//!
//! A self-scheduling HTTP poller. Every tick issues one fetch of the pull
//! endpoint, bounded by the request timeout so a stalled request is aborted
//! and reported instead of hanging the loop. Ticks that fall behind are
//! delayed rather than bunched up.

use std::time::Duration;

use serde_json::Value;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::TelemetrySink;
use crate::errors::TransportError;
use crate::model::{DataSource, PullEnvelope};
use crate::retrieve::ApiClient;

pub struct PullPoller {
    client: ApiClient,
    timeout: Duration,
    interval: Duration,
}

impl PullPoller {
    /// Builds a poller for an absolute `http(s)://` endpoint.
    pub fn new(
        url: &str,
        request_timeout: Duration,
        poll_interval: Duration,
        retries: u32,
        auth_token: Option<String>,
    ) -> Result<Self, TransportError> {
        let client = ApiClient::new(url, request_timeout, retries, auth_token)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))?;
        match client.base_url().scheme() {
            "http" | "https" => {}
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "{}: unsupported scheme `{}`",
                    url, other
                )))
            }
        }
        Ok(Self {
            client,
            timeout: request_timeout,
            interval: poll_interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One bounded fetch. Returns the `data` record of a successful envelope.
    pub async fn fetch_once(&self) -> Result<Value, TransportError> {
        let response = match timeout(self.timeout, self.client.get::<PullEnvelope>("")).await {
            Err(_) => return Err(TransportError::Timeout(self.timeout)),
            Ok(Err(e)) => return Err(TransportError::Request(e.to_string())),
            Ok(Ok(response)) => response,
        };

        if !response.success {
            return Err(TransportError::Http {
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            });
        }
        let envelope = response
            .data
            .ok_or_else(|| TransportError::Upstream("empty payload".into()))?;
        if !envelope.success {
            return Err(TransportError::Upstream(
                envelope.error.unwrap_or_else(|| "unspecified error".into()),
            ));
        }
        envelope
            .data
            .ok_or_else(|| TransportError::Upstream("empty payload".into()))
    }

    /// Polls until `token` is cancelled. Failures are reported to the sink
    /// and polling continues on the next tick.
    pub async fn run<S>(&self, sink: &S, token: &CancellationToken)
    where
        S: TelemetrySink + ?Sized,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delivering = false;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = self.fetch_once() => result,
            };
            match result {
                Ok(record) => {
                    if !delivering {
                        sink.opened(DataSource::Pull);
                        delivering = true;
                    }
                    sink.pull_record(record);
                }
                Err(err) => {
                    delivering = false;
                    sink.transport_error(DataSource::Pull, &err);
                }
            }
        }
    }
}
