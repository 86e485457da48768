//! # meridian-td
//!
//! Trading (account and order management) for the Meridian service:
//!
//! - [`client`] — signed REST operations: account, positions, order
//!   placement/cancellation, and paginated order listing.
//! - [`stream`] — the trade-updates live stream over the reconnecting
//!   session.
//! - [`auth`] — HMAC-SHA256 request signing.

pub mod auth;
pub mod client;
pub mod stream;

pub use client::{ListOrdersRequest, TradingClient};
pub use stream::{TdCodec, TradingStream};
