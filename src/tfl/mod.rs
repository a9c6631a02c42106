//! Client for the transit provider's HTTP API: typed payloads, token-bucket
//! rate limiting, retry with jitter, and a content-addressed response cache.

pub mod cache;
pub mod client;
pub mod models;
pub mod rate_limit;

pub use client::{CancelFlag, EndpointFamily, TflClient};
