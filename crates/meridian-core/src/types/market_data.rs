//! Market data records.
//!
//! Field names follow the compact wire format the Meridian service uses for
//! both historical payloads and streaming frames (`t`/`o`/`h`/`l`/`c`/`v`,
//! ...). Historical per-symbol arrays omit the `S` field, so `symbol`
//! defaults to empty there; streaming frames always carry it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One aggregated bar (candle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time.
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "o")]
    pub open: f64,

    #[serde(rename = "h")]
    pub high: f64,

    #[serde(rename = "l")]
    pub low: f64,

    #[serde(rename = "c")]
    pub close: f64,

    /// Total traded volume over the bar.
    #[serde(rename = "v")]
    pub volume: u64,

    #[serde(rename = "S", default)]
    pub symbol: String,
}

/// A single executed trade (tick).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "p")]
    pub price: f64,

    #[serde(rename = "s")]
    pub size: u64,

    /// Venue-assigned trade identifier.
    #[serde(rename = "i", default)]
    pub trade_id: u64,

    #[serde(rename = "S", default)]
    pub symbol: String,
}

/// Top-of-book quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "bp")]
    pub bid_price: f64,

    #[serde(rename = "bs")]
    pub bid_size: u64,

    #[serde(rename = "ap")]
    pub ask_price: f64,

    #[serde(rename = "as")]
    pub ask_size: u64,

    #[serde(rename = "S", default)]
    pub symbol: String,
}

/// Opening/closing auction print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auction {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    /// `"o"` for the opening auction, `"c"` for the closing auction.
    #[serde(rename = "k")]
    pub kind: String,

    #[serde(rename = "p")]
    pub price: f64,

    #[serde(rename = "s")]
    pub size: u64,

    #[serde(rename = "S", default)]
    pub symbol: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_decodes_historical_shape() {
        // Historical per-symbol arrays carry no `S` field.
        let bar: Bar = serde_json::from_str(
            r#"{"t":"2026-08-03T13:30:00Z","o":187.1,"h":188.4,"l":186.9,"c":188.0,"v":43210}"#,
        )
        .unwrap();
        assert_eq!(bar.volume, 43210);
        assert_eq!(bar.symbol, "");
        assert_eq!(bar.close, 188.0);
    }

    #[test]
    fn trade_decodes_streaming_shape() {
        let trade: Trade = serde_json::from_str(
            r#"{"T":"t","S":"AAPL","t":"2026-08-03T13:30:01.123Z","p":188.02,"s":100,"i":771}"#,
        )
        .unwrap();
        assert_eq!(trade.symbol, "AAPL");
        assert_eq!(trade.size, 100);
        assert_eq!(trade.trade_id, 771);
    }

    #[test]
    fn quote_decodes_both_sides() {
        let quote: Quote = serde_json::from_str(
            r#"{"S":"MSFT","t":"2026-08-03T13:30:00Z","bp":411.5,"bs":3,"ap":411.6,"as":5}"#,
        )
        .unwrap();
        assert_eq!(quote.bid_size, 3);
        assert_eq!(quote.ask_size, 5);
    }
}
