//! Trade-updates live stream.
//!
//! The trading stream shares the market-data framing (JSON arrays with a
//! `"T"` discriminator) but carries a single account-wide channel: order
//! lifecycle events tagged `"u"`, subscribed with a `listen` action.

use std::sync::Arc;

use serde_json::{Value, json};

use meridian_core::config::AppConfig;
use meridian_core::error::MeridianError;
use meridian_core::types::TradeUpdate;
use meridian_core::ws::registry::{StreamKey, SubscriptionHandle};
use meridian_core::ws::session::{
    AuthStatus, SessionEventReceiver, SessionState, StreamAuth, StreamCodec, StreamMessage,
    StreamSession,
};
use meridian_core::ws::transport::WsConnector;

/// Codec for the trade-updates stream endpoint.
pub struct TdCodec;

impl StreamCodec for TdCodec {
    type Item = TradeUpdate;

    fn auth_frame(&self, auth: &StreamAuth) -> String {
        json!({
            "action": "auth",
            "key": auth.key,
            "secret": auth.secret,
        })
        .to_string()
    }

    fn subscribe_frame(&self, keys: &[StreamKey]) -> String {
        listen_frame("listen", keys)
    }

    fn unsubscribe_frame(&self, keys: &[StreamKey]) -> String {
        listen_frame("unlisten", keys)
    }

    fn parse(&self, text: &str) -> Vec<StreamMessage<TradeUpdate>> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                return vec![StreamMessage::Malformed(format!("invalid JSON frame: {e}"))];
            }
        };

        let Value::Array(entries) = value else {
            return vec![StreamMessage::Malformed(format!(
                "expected array frame, got: {value}"
            ))];
        };

        entries.iter().map(decode_entry).collect()
    }
}

fn listen_frame(action: &str, keys: &[StreamKey]) -> String {
    let mut streams: Vec<&'static str> = keys.iter().map(|key| key.kind.channel()).collect();
    streams.sort();
    streams.dedup();
    json!({ "action": action, "streams": streams }).to_string()
}

fn decode_entry(entry: &Value) -> StreamMessage<TradeUpdate> {
    let Some(tag) = entry.get("T").and_then(Value::as_str) else {
        return StreamMessage::Malformed(format!("message without T tag: {entry}"));
    };

    match tag {
        "u" => match serde_json::from_value::<TradeUpdate>(
            entry.get("data").cloned().unwrap_or(Value::Null),
        ) {
            Ok(update) => StreamMessage::Item {
                key: StreamKey::order_updates(),
                item: update,
            },
            Err(e) => StreamMessage::Malformed(format!("undecodable trade update: {e}")),
        },
        "success" => {
            let msg = entry.get("msg").and_then(Value::as_str).unwrap_or("");
            if msg == "authenticated" {
                StreamMessage::AuthOk {
                    message: msg.to_string(),
                }
            } else {
                StreamMessage::Control(msg.to_string())
            }
        }
        "error" => {
            let code = entry.get("code").and_then(Value::as_u64).unwrap_or(0) as u16;
            let message = entry
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            if matches!(code, 401 | 402 | 406) {
                StreamMessage::AuthFailed { code, message }
            } else {
                StreamMessage::VendorError { code, message }
            }
        }
        "listening" => StreamMessage::Control(entry.to_string()),
        other => StreamMessage::Malformed(format!("unknown message tag `{other}`")),
    }
}

/// Live order-lifecycle events for the authenticated account.
pub struct TradingStream {
    session: StreamSession<TdCodec, WsConnector>,
}

impl TradingStream {
    /// Create a stream client from config. Nothing connects until
    /// [`connect`](Self::connect).
    pub fn new(config: &AppConfig) -> Result<(Self, SessionEventReceiver), MeridianError> {
        let (key, secret) = config.credentials.resolve()?;
        let connector = WsConnector::new(config.endpoints.td_stream_url.clone());
        let (session, events) = StreamSession::new(
            connector,
            TdCodec,
            StreamAuth { key, secret },
            config.reconnect.clone(),
        );
        Ok((Self { session }, events))
    }

    pub async fn connect(&mut self) -> Result<AuthStatus, MeridianError> {
        self.session.connect().await
    }

    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Subscribe `callback` to all order-lifecycle events.
    pub fn subscribe_updates(
        &self,
        callback: impl Fn(&TradeUpdate) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle, MeridianError> {
        self.session.subscribe(
            vec![StreamKey::order_updates()],
            Arc::new(move |_key, update| callback(update)),
        )
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.session.unsubscribe(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TdCodec {
        TdCodec
    }

    #[test]
    fn listen_frame_dedups_streams() {
        let keys = vec![StreamKey::order_updates(), StreamKey::order_updates()];
        assert_eq!(
            codec().subscribe_frame(&keys),
            r#"{"action":"listen","streams":["trade_updates"]}"#
        );
        assert_eq!(
            codec().unsubscribe_frame(&keys[..1]),
            r#"{"action":"unlisten","streams":["trade_updates"]}"#
        );
    }

    #[test]
    fn parses_fill_update() {
        let frame = r#"[{
            "T": "u",
            "data": {
                "event": "fill",
                "timestamp": "2026-08-03T13:30:05Z",
                "price": 187.95,
                "qty": 10,
                "order": {
                    "id": "oid-1", "symbol": "AAPL", "side": "buy", "type": "market",
                    "time_in_force": "day", "status": "filled", "qty": 10,
                    "filled_qty": 10, "filled_avg_price": 187.95,
                    "limit_price": null, "stop_price": null,
                    "created_at": "2026-08-03T13:30:00Z",
                    "updated_at": "2026-08-03T13:30:05Z"
                }
            }
        }]"#;
        let messages = codec().parse(frame);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            StreamMessage::Item { key, item } => {
                assert_eq!(*key, StreamKey::order_updates());
                assert_eq!(item.event, "fill");
                assert_eq!(item.order.id, "oid-1");
            }
            other => panic!("expected item, got {other:?}"),
        }
    }

    #[test]
    fn update_without_data_is_malformed() {
        let messages = codec().parse(r#"[{"T":"u"}]"#);
        assert!(matches!(&messages[0], StreamMessage::Malformed(_)));
    }

    #[test]
    fn auth_rejection_maps_to_auth_failure() {
        let messages = codec().parse(r#"[{"T":"error","code":402,"msg":"auth failed"}]"#);
        assert!(matches!(
            &messages[0],
            StreamMessage::AuthFailed { code: 402, .. }
        ));
    }
}
