//! # meridian-core
//!
//! Core crate for the Meridian client, providing:
//!
//! - **Types** (`types`) — enums, market data structs, trading structs, symbol utils
//! - **Configuration** (`config`) — JSON config deserialization, policy structs
//! - **Error types** (`error`) — domain-specific `MeridianError` via thiserror
//! - **Backoff** (`backoff`) — clamped exponential delay computation
//! - **Retry engine** (`retry`) — transient-failure classification and retries
//! - **REST transport** (`rest`) — throttled `reqwest` wrapper with rate-limit tracking
//! - **Pagination** (`paginate`) — lazy page/item streams over cursor APIs
//! - **WebSocket** (`ws`) — duplex transport, subscription registry, reconnecting session
//! - **Time utilities** (`time_util`) — epoch timestamps for request signing
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod backoff;
pub mod config;
pub mod error;
pub mod logging;
pub mod paginate;
pub mod rest;
pub mod retry;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use error::{FailureKind, MeridianError, RetryHint};
pub use types::*;
