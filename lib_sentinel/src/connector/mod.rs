//! # Transport Connector Module
//!
//! Connection lifecycle on top of the ingestors: push-first sessions,
//! exponential reconnect, failover to pull, and subscriber-driven
//! connect/disconnect.

/// Reconnect delay schedule.
pub mod backoff;
/// Connector options.
pub mod options;
/// The connector itself.
pub mod transport_connector;

pub use backoff::{BackoffStep, ReconnectPolicy};
pub use options::ConnectorOptions;
pub use transport_connector::{ConnectorSubscription, TransportConnector};
