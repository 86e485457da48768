//! Meridian market-data stream codec.
//!
//! Frames are JSON arrays of objects discriminated by a `"T"` field:
//!
//! | `T`            | Meaning                         |
//! |----------------|---------------------------------|
//! | `t`            | Trade                           |
//! | `q`            | Quote                           |
//! | `b`            | Bar                             |
//! | `success`      | Auth/connection acknowledgement |
//! | `error`        | Vendor fault with numeric code  |
//! | `subscription` | Current subscription snapshot   |
//!
//! Client actions are single objects: `{"action":"auth",...}` and
//! `{"action":"subscribe","trades":[...],"quotes":[...],"bars":[...]}`.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use meridian_core::types::{Bar, MessageKind, Quote, Trade};
use meridian_core::ws::registry::StreamKey;
use meridian_core::ws::session::{StreamAuth, StreamCodec, StreamMessage};

/// One decoded market-data item.
#[derive(Debug, Clone)]
pub enum MdItem {
    Trade(Trade),
    Quote(Quote),
    Bar(Bar),
}

/// Codec for the market-data stream endpoint.
pub struct MdCodec;

impl MdCodec {
    fn decode_entry(entry: &Value) -> StreamMessage<MdItem> {
        let Some(tag) = entry.get("T").and_then(Value::as_str) else {
            return StreamMessage::Malformed(format!("message without T tag: {entry}"));
        };

        match tag {
            "t" => decode_item::<Trade>(entry, MessageKind::Trade, |t| {
                let symbol = t.symbol.clone();
                (symbol, MdItem::Trade(t))
            }),
            "q" => decode_item::<Quote>(entry, MessageKind::Quote, |q| {
                let symbol = q.symbol.clone();
                (symbol, MdItem::Quote(q))
            }),
            "b" => decode_item::<Bar>(entry, MessageKind::Bar, |b| {
                let symbol = b.symbol.clone();
                (symbol, MdItem::Bar(b))
            }),
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
                // Auth-phase rejections and the connection limit are
                // authentication verdicts; everything else is a server-side
                // fault reported over the channel.
                if matches!(code, 401 | 402 | 406) {
                    StreamMessage::AuthFailed { code, message }
                } else {
                    StreamMessage::VendorError { code, message }
                }
            }
            "subscription" => StreamMessage::Control(entry.to_string()),
            other => StreamMessage::Malformed(format!("unknown message tag `{other}`")),
        }
    }
}

fn decode_item<T: serde::de::DeserializeOwned>(
    entry: &Value,
    kind: MessageKind,
    wrap: impl FnOnce(T) -> (String, MdItem),
) -> StreamMessage<MdItem> {
    match serde_json::from_value::<T>(entry.clone()) {
        Ok(decoded) => {
            let (symbol, item) = wrap(decoded);
            StreamMessage::Item {
                key: StreamKey::new(symbol, kind),
                item,
            }
        }
        Err(e) => StreamMessage::Malformed(format!("undecodable {kind} message: {e}")),
    }
}

impl StreamCodec for MdCodec {
    type Item = MdItem;

    fn auth_frame(&self, auth: &StreamAuth) -> String {
        json!({
            "action": "auth",
            "key": auth.key,
            "secret": auth.secret,
        })
        .to_string()
    }

    fn subscribe_frame(&self, keys: &[StreamKey]) -> String {
        subscription_frame("subscribe", keys)
    }

    fn unsubscribe_frame(&self, keys: &[StreamKey]) -> String {
        subscription_frame("unsubscribe", keys)
    }

    fn parse(&self, text: &str) -> Vec<StreamMessage<MdItem>> {
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

        entries.iter().map(Self::decode_entry).collect()
    }
}

/// Build a subscribe/unsubscribe frame, grouping symbols per channel.
fn subscription_frame(action: &str, keys: &[StreamKey]) -> String {
    let mut channels: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    for key in keys {
        channels
            .entry(key.kind.channel())
            .or_default()
            .push(key.symbol.clone());
    }

    let mut frame = serde_json::Map::new();
    frame.insert("action".to_string(), Value::String(action.to_string()));
    for (channel, mut symbols) in channels {
        symbols.sort();
        frame.insert(channel.to_string(), json!(symbols));
    }
    Value::Object(frame).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> MdCodec {
        MdCodec
    }

    #[test]
    fn auth_frame_carries_credentials() {
        let frame = codec().auth_frame(&StreamAuth {
            key: "k".into(),
            secret: "s".into(),
        });
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["action"], "auth");
        assert_eq!(value["key"], "k");
        assert_eq!(value["secret"], "s");
    }

    #[test]
    fn subscribe_frame_groups_symbols_by_channel() {
        let keys = vec![
            StreamKey::new("MSFT", MessageKind::Trade),
            StreamKey::new("AAPL", MessageKind::Trade),
            StreamKey::new("AAPL", MessageKind::Quote),
        ];
        let frame = codec().subscribe_frame(&keys);
        assert_eq!(
            frame,
            r#"{"action":"subscribe","quotes":["AAPL"],"trades":["AAPL","MSFT"]}"#
        );
    }

    #[test]
    fn parses_authenticated_ack() {
        let messages = codec().parse(r#"[{"T":"success","msg":"authenticated"}]"#);
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], StreamMessage::AuthOk { .. }));
    }

    #[test]
    fn connected_ack_is_control_not_auth() {
        let messages = codec().parse(r#"[{"T":"success","msg":"connected"}]"#);
        assert!(matches!(&messages[0], StreamMessage::Control(_)));
    }

    #[test]
    fn parses_trades_preserving_order() {
        let messages = codec().parse(
            r#"[
                {"T":"t","S":"AAPL","t":"2026-08-03T13:30:01Z","p":188.02,"s":100,"i":1},
                {"T":"t","S":"AAPL","t":"2026-08-03T13:30:02Z","p":188.05,"s":50,"i":2}
            ]"#,
        );
        assert_eq!(messages.len(), 2);
        let ids: Vec<u64> = messages
            .iter()
            .map(|m| match m {
                StreamMessage::Item {
                    item: MdItem::Trade(t),
                    ..
                } => t.trade_id,
                other => panic!("expected trade, got {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn credential_rejection_is_auth_failure() {
        let messages = codec().parse(r#"[{"T":"error","code":402,"msg":"auth failed"}]"#);
        match &messages[0] {
            StreamMessage::AuthFailed { code, .. } => assert_eq!(*code, 402),
            other => panic!("expected auth failure, got {other:?}"),
        }
    }

    #[test]
    fn other_error_codes_are_vendor_errors() {
        let messages = codec().parse(r#"[{"T":"error","code":410,"msg":"slow client"}]"#);
        assert!(matches!(
            &messages[0],
            StreamMessage::VendorError { code: 410, .. }
        ));
    }

    #[test]
    fn malformed_frames_do_not_fail_parsing() {
        assert!(matches!(
            &codec().parse("not json")[0],
            StreamMessage::Malformed(_)
        ));
        assert!(matches!(
            &codec().parse(r#"{"T":"t"}"#)[0],
            StreamMessage::Malformed(_)
        ));
        assert!(matches!(
            &codec().parse(r#"[{"T":"t","S":"AAPL"}]"#)[0],
            StreamMessage::Malformed(_)
        ));
    }
}
