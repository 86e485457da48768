//! Historical market data over the cursor-paginated REST endpoints.
//!
//! Every listing returns lazy streams: pages (ordered batches) or flat item
//! sequences. Multi-symbol requests come in two shapes: grouped per-page
//! batches (`*_pages_grouped`) advancing one shared server cursor, and a
//! per-symbol fan-out (`*_by_symbol`) where each symbol's stream owns an
//! independent cursor and can be pulled concurrently.
//!
//! # Endpoints
//!
//! | Data     | Single symbol                  | Multi symbol         |
//! |----------|--------------------------------|----------------------|
//! | Bars     | `/v1/stocks/{symbol}/bars`     | `/v1/stocks/bars`    |
//! | Trades   | `/v1/stocks/{symbol}/trades`   | `/v1/stocks/trades`  |
//! | Quotes   | `/v1/stocks/{symbol}/quotes`   | `/v1/stocks/quotes`  |
//! | Auctions | `/v1/stocks/{symbol}/auctions` | `/v1/stocks/auctions`|

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::de::DeserializeOwned;

use meridian_core::config::AppConfig;
use meridian_core::error::MeridianError;
use meridian_core::paginate::{self, Page, PageCursor, PageEnvelope};
use meridian_core::rest::RestClient;
use meridian_core::retry::RateLimit;
use meridian_core::types::{Auction, Bar, Quote, Trade, join_symbols, normalize_symbol};

/// Bar aggregation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Minute,
    Hour,
    Day,
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minute => write!(f, "1Min"),
            Self::Hour => write!(f, "1Hour"),
            Self::Day => write!(f, "1Day"),
        }
    }
}

/// Largest page size the service accepts.
const MAX_PAGE_SIZE: u32 = 10_000;

/// Single-symbol bars request.
#[derive(Debug, Clone)]
pub struct BarsRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Per-call page size override.
    pub limit: Option<u32>,
}

impl BarsRequest {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            start,
            end,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn validate(&self) -> Result<(), MeridianError> {
        validate_symbol(&self.symbol)?;
        validate_range(self.start, self.end, self.limit)
    }

    fn query(&self) -> Vec<(String, String)> {
        let mut query = range_query(self.start, self.end);
        query.push(("timeframe".into(), self.timeframe.to_string()));
        query
    }
}

/// Single-symbol request for tick-level data (trades, quotes, auctions).
#[derive(Debug, Clone)]
pub struct RangeRequest {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: Option<u32>,
}

impl RangeRequest {
    pub fn new(symbol: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn validate(&self) -> Result<(), MeridianError> {
        validate_symbol(&self.symbol)?;
        validate_range(self.start, self.end, self.limit)
    }
}

/// Multi-symbol bars request.
#[derive(Debug, Clone)]
pub struct MultiBarsRequest {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: Option<u32>,
}

impl MultiBarsRequest {
    pub fn new(
        symbols: Vec<String>,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            symbols,
            timeframe,
            start,
            end,
            limit: None,
        }
    }

    fn validate(&self) -> Result<(), MeridianError> {
        validate_symbols(&self.symbols)?;
        validate_range(self.start, self.end, self.limit)
    }

    fn single(&self, symbol: &str) -> BarsRequest {
        BarsRequest {
            symbol: symbol.to_string(),
            timeframe: self.timeframe,
            start: self.start,
            end: self.end,
            limit: self.limit,
        }
    }
}

/// Multi-symbol request for tick-level data.
#[derive(Debug, Clone)]
pub struct MultiRangeRequest {
    pub symbols: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: Option<u32>,
}

impl MultiRangeRequest {
    pub fn new(symbols: Vec<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            symbols,
            start,
            end,
            limit: None,
        }
    }

    fn validate(&self) -> Result<(), MeridianError> {
        validate_symbols(&self.symbols)?;
        validate_range(self.start, self.end, self.limit)
    }

    fn single(&self, symbol: &str) -> RangeRequest {
        RangeRequest {
            symbol: symbol.to_string(),
            start: self.start,
            end: self.end,
            limit: self.limit,
        }
    }
}

/// Historical market-data client.
///
/// Cheap to clone via the shared [`RestClient`]; every returned stream is
/// `'static` and owns its own cursor.
pub struct HistoricalClient {
    rest: Arc<RestClient>,
    default_page_size: u32,
}

impl HistoricalClient {
    pub fn new(config: &AppConfig) -> Result<Self, MeridianError> {
        let (key, _secret) = config.credentials.resolve()?;
        Ok(Self {
            rest: Arc::new(RestClient::new(
                config.endpoints.rest_url.clone(),
                key,
                config.throttle.clone(),
            )),
            default_page_size: config.pagination.page_size,
        })
    }

    /// Build from an existing REST client (shared with other facades).
    pub fn from_parts(rest: Arc<RestClient>, default_page_size: u32) -> Self {
        Self {
            rest,
            default_page_size,
        }
    }

    /// Most recent rate-limit standing observed on this client.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rest.rate_limit()
    }

    // -----------------------------------------------------------------------
    // Bars
    // -----------------------------------------------------------------------

    /// Lazy batches of bars, one per fetched page.
    pub fn bar_pages(&self, request: &BarsRequest) -> BoxStream<'static, Result<Vec<Bar>, MeridianError>> {
        if let Err(err) = request.validate() {
            return error_stream(err);
        }
        self.series_pages(
            single_path(&request.symbol, "bars"),
            request.query(),
            "bars",
            request.limit,
        )
        .boxed()
    }

    /// Lazy flat sequence of bars across all pages.
    pub fn bars(&self, request: &BarsRequest) -> BoxStream<'static, Result<Bar, MeridianError>> {
        paginate::flatten_batches(self.bar_pages(request)).boxed()
    }

    /// Per-page multi-symbol bar batches, advancing one shared cursor.
    pub fn bar_pages_grouped(
        &self,
        request: &MultiBarsRequest,
    ) -> BoxStream<'static, Result<HashMap<String, Vec<Bar>>, MeridianError>> {
        if let Err(err) = request.validate() {
            return error_stream(err);
        }
        let mut query = range_query(request.start, request.end);
        query.push(("timeframe".into(), request.timeframe.to_string()));
        query.push(("symbols".into(), join_symbols(&request.symbols)));
        self.grouped_pages(multi_path("bars"), query, "bars", request.limit)
    }

    /// Independent per-symbol bar streams, each with its own cursor.
    pub fn bars_by_symbol(
        &self,
        request: &MultiBarsRequest,
    ) -> HashMap<String, BoxStream<'static, Result<Bar, MeridianError>>> {
        request
            .symbols
            .iter()
            .map(|symbol| {
                let symbol = normalize_symbol(symbol);
                let stream = self.bars(&request.single(&symbol));
                (symbol, stream)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Trades
    // -----------------------------------------------------------------------

    pub fn trade_pages(&self, request: &RangeRequest) -> BoxStream<'static, Result<Vec<Trade>, MeridianError>> {
        self.range_pages::<Trade>(request, "trades")
    }

    pub fn trades(&self, request: &RangeRequest) -> BoxStream<'static, Result<Trade, MeridianError>> {
        paginate::flatten_batches(self.trade_pages(request)).boxed()
    }

    pub fn trade_pages_grouped(
        &self,
        request: &MultiRangeRequest,
    ) -> BoxStream<'static, Result<HashMap<String, Vec<Trade>>, MeridianError>> {
        self.multi_range_pages::<Trade>(request, "trades")
    }

    pub fn trades_by_symbol(
        &self,
        request: &MultiRangeRequest,
    ) -> HashMap<String, BoxStream<'static, Result<Trade, MeridianError>>> {
        self.range_fan_out(request, |client, single| client.trades(single))
    }

    // -----------------------------------------------------------------------
    // Quotes
    // -----------------------------------------------------------------------

    pub fn quote_pages(&self, request: &RangeRequest) -> BoxStream<'static, Result<Vec<Quote>, MeridianError>> {
        self.range_pages::<Quote>(request, "quotes")
    }

    pub fn quotes(&self, request: &RangeRequest) -> BoxStream<'static, Result<Quote, MeridianError>> {
        paginate::flatten_batches(self.quote_pages(request)).boxed()
    }

    pub fn quote_pages_grouped(
        &self,
        request: &MultiRangeRequest,
    ) -> BoxStream<'static, Result<HashMap<String, Vec<Quote>>, MeridianError>> {
        self.multi_range_pages::<Quote>(request, "quotes")
    }

    pub fn quotes_by_symbol(
        &self,
        request: &MultiRangeRequest,
    ) -> HashMap<String, BoxStream<'static, Result<Quote, MeridianError>>> {
        self.range_fan_out(request, |client, single| client.quotes(single))
    }

    // -----------------------------------------------------------------------
    // Auctions
    // -----------------------------------------------------------------------

    pub fn auction_pages(
        &self,
        request: &RangeRequest,
    ) -> BoxStream<'static, Result<Vec<Auction>, MeridianError>> {
        self.range_pages::<Auction>(request, "auctions")
    }

    pub fn auctions(&self, request: &RangeRequest) -> BoxStream<'static, Result<Auction, MeridianError>> {
        paginate::flatten_batches(self.auction_pages(request)).boxed()
    }

    pub fn auctions_by_symbol(
        &self,
        request: &MultiRangeRequest,
    ) -> HashMap<String, BoxStream<'static, Result<Auction, MeridianError>>> {
        self.range_fan_out(request, |client, single| client.auctions(single))
    }

    // -----------------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------------

    fn range_pages<T>(
        &self,
        request: &RangeRequest,
        field: &'static str,
    ) -> BoxStream<'static, Result<Vec<T>, MeridianError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        if let Err(err) = request.validate() {
            return error_stream(err);
        }
        self.series_pages(
            single_path(&request.symbol, field),
            range_query(request.start, request.end),
            field,
            request.limit,
        )
        .boxed()
    }

    fn multi_range_pages<T>(
        &self,
        request: &MultiRangeRequest,
        field: &'static str,
    ) -> BoxStream<'static, Result<HashMap<String, Vec<T>>, MeridianError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        if let Err(err) = request.validate() {
            return error_stream(err);
        }
        let mut query = range_query(request.start, request.end);
        query.push(("symbols".into(), join_symbols(&request.symbols)));
        self.grouped_pages(multi_path(field), query, field, request.limit)
    }

    fn range_fan_out<T>(
        &self,
        request: &MultiRangeRequest,
        per_symbol: impl Fn(&Self, &RangeRequest) -> BoxStream<'static, Result<T, MeridianError>>,
    ) -> HashMap<String, BoxStream<'static, Result<T, MeridianError>>> {
        request
            .symbols
            .iter()
            .map(|symbol| {
                let symbol = normalize_symbol(symbol);
                let stream = per_symbol(self, &request.single(&symbol));
                (symbol, stream)
            })
            .collect()
    }

    /// One paginated series of `T` under `field` in the response envelope.
    fn series_pages<T>(
        &self,
        path: String,
        base_query: Vec<(String, String)>,
        field: &'static str,
        limit: Option<u32>,
    ) -> impl futures_util::Stream<Item = Result<Vec<T>, MeridianError>> + Send + use<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let rest = Arc::clone(&self.rest);
        let cursor = PageCursor::new(Some(limit.unwrap_or(self.default_page_size)));

        paginate::pages(cursor, move |cursor: PageCursor| {
            let rest = Arc::clone(&rest);
            let path = path.clone();
            let query = cursor_query(&base_query, &cursor);
            async move {
                let mut envelope: PageEnvelope = rest.get(&path, query).await?;
                let items: Vec<T> = envelope.take(field)?;
                Ok(Page {
                    items,
                    next_token: envelope.next_page_token,
                })
            }
        })
    }

    /// One paginated multi-symbol series: each page is a symbol → batch map.
    fn grouped_pages<T>(
        &self,
        path: String,
        base_query: Vec<(String, String)>,
        field: &'static str,
        limit: Option<u32>,
    ) -> BoxStream<'static, Result<HashMap<String, Vec<T>>, MeridianError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let rest = Arc::clone(&self.rest);
        let cursor = PageCursor::new(Some(limit.unwrap_or(self.default_page_size)));

        paginate::pages(cursor, move |cursor: PageCursor| {
            let rest = Arc::clone(&rest);
            let path = path.clone();
            let query = cursor_query(&base_query, &cursor);
            async move {
                let mut envelope: PageEnvelope = rest.get(&path, query).await?;
                let grouped: HashMap<String, Vec<T>> = envelope.take(field)?;
                // The pagination engine treats a page as empty only when no
                // symbol contributed any items.
                let items = if grouped.values().all(Vec::is_empty) {
                    Vec::new()
                } else {
                    vec![grouped]
                };
                Ok(Page {
                    items,
                    next_token: envelope.next_page_token,
                })
            }
        })
        .map(|batch| batch.map(|mut maps| maps.pop().unwrap_or_default()))
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

fn single_path(symbol: &str, kind: &str) -> String {
    format!("/v1/stocks/{}/{kind}", normalize_symbol(symbol))
}

fn multi_path(kind: &str) -> String {
    format!("/v1/stocks/{kind}")
}

fn range_query(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(String, String)> {
    vec![
        ("start".into(), start.to_rfc3339()),
        ("end".into(), end.to_rfc3339()),
    ]
}

fn cursor_query(base: &[(String, String)], cursor: &PageCursor) -> Vec<(String, String)> {
    let mut query = base.to_vec();
    if let Some(size) = cursor.page_size {
        query.push(("limit".into(), size.to_string()));
    }
    if let Some(ref token) = cursor.token {
        query.push(("page_token".into(), token.clone()));
    }
    query
}

fn validate_symbol(symbol: &str) -> Result<(), MeridianError> {
    if symbol.trim().is_empty() {
        return Err(MeridianError::InvalidRequest("symbol must not be empty".into()));
    }
    Ok(())
}

fn validate_symbols(symbols: &[String]) -> Result<(), MeridianError> {
    if symbols.is_empty() {
        return Err(MeridianError::InvalidRequest(
            "symbol list must not be empty".into(),
        ));
    }
    symbols.iter().try_for_each(|s| validate_symbol(s))
}

fn validate_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: Option<u32>,
) -> Result<(), MeridianError> {
    if start >= end {
        return Err(MeridianError::InvalidRequest(format!(
            "start {start} is not before end {end}"
        )));
    }
    if let Some(limit) = limit {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(MeridianError::InvalidRequest(format!(
                "limit {limit} outside 1..={MAX_PAGE_SIZE}"
            )));
        }
    }
    Ok(())
}

/// A stream that yields one error and ends — used when validation fails
/// before any fetch.
fn error_stream<T: Send + 'static>(err: MeridianError) -> BoxStream<'static, Result<T, MeridianError>> {
    stream::once(std::future::ready(Err(err))).boxed()
}
