//! Enumerations used throughout the Meridian client.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Streaming message kinds
// ---------------------------------------------------------------------------

/// The kind of live-update message a subscription refers to.
///
/// Together with a symbol this forms the logical channel key on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Trade,
    Quote,
    Bar,
    OrderUpdate,
}

impl MessageKind {
    /// The channel name used in subscribe frames.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Trade => "trades",
            Self::Quote => "quotes",
            Self::Bar => "bars",
            Self::OrderUpdate => "trade_updates",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.channel())
    }
}

// ---------------------------------------------------------------------------
// Order / trading enums
// ---------------------------------------------------------------------------

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order execution type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// How long an order stays working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

/// Order status — as reported by the order endpoints and the trade-updates
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Accepted,
    PendingNew,
    PartiallyFilled,
    Filled,
    PendingCancel,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// True for statuses that can still produce fills.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::New | Self::Accepted | Self::PendingNew | Self::PartiallyFilled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_channels() {
        assert_eq!(MessageKind::Trade.channel(), "trades");
        assert_eq!(MessageKind::OrderUpdate.to_string(), "trade_updates");
    }

    #[test]
    fn order_status_serde_round_trip() {
        let json = serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap();
        assert_eq!(json, r#""partially_filled""#);
        let back: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn open_statuses() {
        assert!(OrderStatus::PartiallyFilled.is_open());
        assert!(!OrderStatus::Filled.is_open());
        assert!(!OrderStatus::Canceled.is_open());
    }
}
