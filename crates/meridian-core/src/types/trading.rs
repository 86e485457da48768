//! Account and order management records.
//!
//! These follow the verbose snake_case shape of the trading endpoints, as
//! opposed to the compact field names of the market-data payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{OrderSide, OrderStatus, OrderType, TimeInForce};

/// A new-order request, serialized as the POST body.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: f64,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    /// Caller-chosen idempotency key; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// A market order for `qty` units of `symbol`.
    pub fn market(symbol: impl Into<String>, side: OrderSide, qty: f64) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Day,
            limit_price: None,
            stop_price: None,
            client_order_id: None,
        }
    }

    /// A day limit order at `limit_price`.
    pub fn limit(symbol: impl Into<String>, side: OrderSide, qty: f64, limit_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Day,
            limit_price: Some(limit_price),
            stop_price: None,
            client_order_id: None,
        }
    }
}

/// An order as reported by the trading endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    #[serde(default)]
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub qty: f64,
    #[serde(default)]
    pub filled_qty: f64,
    pub filled_avg_price: Option<f64>,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub currency: String,
    pub cash: f64,
    pub buying_power: f64,
    pub equity: f64,
    pub status: String,
}

/// One open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed quantity — negative for short positions.
    pub qty: f64,
    pub avg_entry_price: f64,
    pub market_value: f64,
    pub unrealized_pl: f64,
}

/// One event on the trade-updates stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeUpdate {
    /// Event kind: `"new"`, `"fill"`, `"partial_fill"`, `"canceled"`, ...
    pub event: String,
    pub order: Order,
    pub timestamp: DateTime<Utc>,
    /// Fill price, present on fill events.
    pub price: Option<f64>,
    /// Fill quantity, present on fill events.
    pub qty: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_request_serializes_without_absent_fields() {
        let req = OrderRequest::market("AAPL", OrderSide::Buy, 10.0);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""type":"market""#));
        assert!(!json.contains("limit_price"));
        assert!(!json.contains("client_order_id"));
    }

    #[test]
    fn order_decodes() {
        let order: Order = serde_json::from_str(
            r#"{
                "id": "904837e3-3b76-47ec-b432-046db621571b",
                "client_order_id": "my-order-1",
                "symbol": "AAPL",
                "side": "buy",
                "type": "limit",
                "time_in_force": "day",
                "status": "partially_filled",
                "qty": 10,
                "filled_qty": 4,
                "filled_avg_price": 187.95,
                "limit_price": 188.0,
                "stop_price": null,
                "created_at": "2026-08-03T13:30:00Z",
                "updated_at": "2026-08-03T13:30:05Z"
            }"#,
        )
        .unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_qty, 4.0);
        assert_eq!(order.limit_price, Some(188.0));
        assert_eq!(order.stop_price, None);
    }

    #[test]
    fn trade_update_decodes_fill() {
        let update: TradeUpdate = serde_json::from_str(
            r#"{
                "event": "fill",
                "timestamp": "2026-08-03T13:30:05Z",
                "price": 187.95,
                "qty": 10,
                "order": {
                    "id": "x", "symbol": "AAPL", "side": "buy", "type": "market",
                    "time_in_force": "day", "status": "filled", "qty": 10,
                    "filled_qty": 10, "filled_avg_price": 187.95,
                    "limit_price": null, "stop_price": null,
                    "created_at": "2026-08-03T13:30:00Z",
                    "updated_at": "2026-08-03T13:30:05Z"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(update.event, "fill");
        assert_eq!(update.order.status, OrderStatus::Filled);
    }
}
