//! # Data Ingestors Module
//!
//! The two ways telemetry enters the system. Each ingestor owns its network
//! loop and reports what happens to a [`TelemetrySink`]; neither knows about
//! snapshots, backoff or failover, which live in the connector.
//!
//! - **`push_wss`**: a WebSocket session with client heartbeats and a
//!   silent-socket watchdog.
//! - **`pull_polling`**: a self-scheduling HTTP poller.

use serde_json::Value;

use crate::errors::TransportError;
use crate::model::{DataSource, PushEnvelope};

/// HTTP polling of the pull endpoint.
pub mod pull_polling;
/// WebSocket session against the push endpoint.
pub mod push_wss;

pub use pull_polling::PullPoller;
pub use push_wss::{PushConfig, PushSession};

/// Receives everything an ingestor observes. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    /// The transport is delivering data.
    fn opened(&self, source: DataSource);
    /// One decoded push frame.
    fn push_message(&self, envelope: PushEnvelope);
    /// One complete record fetched by the pull transport.
    fn pull_record(&self, record: Value);
    /// A frame that arrived but could not be decoded.
    fn rejected_frame(&self, source: DataSource, reason: String);
    /// A transport failure. Pull errors are reported and polling continues;
    /// push errors end the session.
    fn transport_error(&self, source: DataSource, error: &TransportError);
}
