//! # Data Retrieval Module
//!
//! Generic HTTP retrieval with retries and standardized responses. The pull
//! ingestor delegates all network concerns to this layer and only parses the
//! envelope it gets back.

/// Generic HTTP API client with retry middleware.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
