//! # Core Engine Module
//!
//! The state side of the ingestion pipeline, always compiled:
//!
//! - **`state_manager`**: owns the canonical snapshot, batches partial updates
//!   behind a debounce timer and publishes one snapshot per flush.
//! - **`dispatcher`**: ordered, panic-isolated fan-out of published snapshots to
//!   callbacks and channel clients.
//! - **`registry`**: reference-counted subscriber bookkeeping with a linger
//!   period before the upstream feed is released.
//! - **`merge`**: deep merge of partial JSON updates.

/// Ordered fan-out of published items.
pub mod dispatcher;
/// Deep merge for partial updates.
pub mod merge;
/// Reference counting with a linger mechanism.
pub mod registry;
/// The canonical snapshot store.
pub mod state_manager;

pub use dispatcher::{DispatchStats, Dispatcher, Subscription};
pub use merge::deep_merge;
pub use registry::SubscriberRegistry;
pub use state_manager::{StateManager, StateManagerConfig, StateStats};
