//! # lib_sentinel
//!
//! Telemetry ingestion and snapshot synchronisation for perimeter
//! surveillance displays.
//!
//! Raw detection records arrive over a push WebSocket or a pull HTTP
//! endpoint, are validated and normalised into one canonical [`Snapshot`],
//! and are fanned out to any number of subscribers through a debounced
//! [`StateManager`].
//!
//! - **`schema`** / **`transformer`**: pure validation and mapping of raw records.
//! - **`core`**: the state manager, deep merge and subscriber dispatch.
//! - **`connector`** / **`ingestors`** / **`retrieve`** (feature `transport`):
//!   the network side, with reconnect backoff and push-to-pull failover.
//! - **`loggers`** (feature `loggers`): `tracing` bootstrap for hosts.

#![forbid(unsafe_code)]

pub mod core;
pub mod errors;
pub mod model;
pub mod schema;
pub mod transformer;

#[cfg(feature = "transport")]
pub mod connector;
#[cfg(feature = "transport")]
pub mod ingestors;
#[cfg(feature = "transport")]
pub mod retrieve;

#[cfg(feature = "loggers")]
pub mod loggers;

pub use crate::core::{StateManager, StateManagerConfig, StateStats};
pub use errors::{ConfigError, SubscriberError, TransportError, ValidationError};
pub use model::{ConnectionStatus, DataSource, Snapshot};
pub use schema::validate_record;
pub use transformer::DataTransformer;

#[cfg(feature = "transport")]
pub use connector::{ConnectorOptions, ConnectorSubscription, TransportConnector};

#[cfg(feature = "loggers")]
pub use errors::LoggerError;
#[cfg(feature = "loggers")]
pub use loggers::{init_logging, LoggerGuard, LoggerLocalOptions};
