//! # Domain Model
//!
//! The canonical snapshot consumed by display layers and the transport
//! envelopes consumed from the detection backend.

/// The canonical snapshot and its enums.
pub mod snapshot;
/// Push and pull transport envelopes.
pub mod wire;

pub use snapshot::*;
pub use wire::{PullEnvelope, PushEnvelope, PushMessageKind};
