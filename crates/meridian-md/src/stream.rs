//! Typed live market-data client over the reconnecting streaming session.

use std::sync::Arc;

use tracing::debug;

use meridian_core::config::AppConfig;
use meridian_core::error::MeridianError;
use meridian_core::types::{Bar, MessageKind, Quote, Trade, normalize_symbol};
use meridian_core::ws::registry::{StreamKey, SubscriptionHandle};
use meridian_core::ws::session::{
    AuthStatus, SessionEventReceiver, SessionState, StreamAuth, StreamSession,
};
use meridian_core::ws::transport::WsConnector;

use crate::codec::{MdCodec, MdItem};

/// Live market-data stream: trades, quotes, and bars by symbol.
///
/// Subscriptions survive reconnects — the session replays the full active
/// set after every successful re-authentication.
pub struct MarketDataStream {
    session: StreamSession<MdCodec, WsConnector>,
}

impl MarketDataStream {
    /// Create a stream client from config. Nothing connects until
    /// [`connect`](Self::connect).
    pub fn new(config: &AppConfig) -> Result<(Self, SessionEventReceiver), MeridianError> {
        let (key, secret) = config.credentials.resolve()?;
        let connector = WsConnector::new(config.endpoints.md_stream_url.clone());
        let (session, events) = StreamSession::new(
            connector,
            MdCodec,
            StreamAuth { key, secret },
            config.reconnect.clone(),
        );
        Ok((Self { session }, events))
    }

    /// Connect and authenticate, retrying transient failures per the
    /// reconnect policy.
    pub async fn connect(&mut self) -> Result<AuthStatus, MeridianError> {
        self.session.connect().await
    }

    /// Terminate the session.
    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Subscribe `callback` to live trades for `symbols`.
    pub fn subscribe_trades(
        &self,
        symbols: &[String],
        callback: impl Fn(&Trade) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle, MeridianError> {
        let callback = Arc::new(callback);
        self.subscribe_kind(symbols, MessageKind::Trade, move |item| {
            if let MdItem::Trade(trade) = item {
                callback(trade);
            }
        })
    }

    /// Subscribe `callback` to live quotes for `symbols`.
    pub fn subscribe_quotes(
        &self,
        symbols: &[String],
        callback: impl Fn(&Quote) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle, MeridianError> {
        let callback = Arc::new(callback);
        self.subscribe_kind(symbols, MessageKind::Quote, move |item| {
            if let MdItem::Quote(quote) = item {
                callback(quote);
            }
        })
    }

    /// Subscribe `callback` to live minute bars for `symbols`.
    pub fn subscribe_bars(
        &self,
        symbols: &[String],
        callback: impl Fn(&Bar) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle, MeridianError> {
        let callback = Arc::new(callback);
        self.subscribe_kind(symbols, MessageKind::Bar, move |item| {
            if let MdItem::Bar(bar) = item {
                callback(bar);
            }
        })
    }

    /// Unregister a subscription; channels nobody else holds are
    /// unsubscribed from the server.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.session.unsubscribe(handle);
    }

    fn subscribe_kind(
        &self,
        symbols: &[String],
        kind: MessageKind,
        dispatch: impl Fn(&MdItem) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle, MeridianError> {
        if symbols.is_empty() {
            return Err(MeridianError::InvalidRequest(
                "symbol list must not be empty".into(),
            ));
        }
        let keys: Vec<StreamKey> = symbols
            .iter()
            .map(|symbol| StreamKey::new(normalize_symbol(symbol), kind))
            .collect();
        debug!("subscribing {} {kind} channel(s)", keys.len());
        self.session
            .subscribe(keys, Arc::new(move |_key, item| dispatch(item)))
    }
}
