//! # meridian-md
//!
//! Market data for the Meridian service:
//!
//! - [`historical`] — REST client for bars, trades, quotes, and auctions,
//!   exposed as lazy page/item streams over the cursor API (single- and
//!   multi-symbol).
//! - [`stream`] — typed live-update client over the reconnecting streaming
//!   session.
//! - [`codec`] — the Meridian market-data wire codec (JSON array frames).
//! - [`aggregates`] — streaming computations over historical sequences.

pub mod aggregates;
pub mod codec;
pub mod historical;
pub mod stream;

pub use codec::{MdCodec, MdItem};
pub use historical::{
    BarsRequest, HistoricalClient, MultiBarsRequest, MultiRangeRequest, RangeRequest, Timeframe,
};
pub use stream::MarketDataStream;
