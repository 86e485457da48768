//! Signed REST operations for account and order management.
//!
//! # Endpoints
//!
//! | Operation      | Method | Path                 |
//! |----------------|--------|----------------------|
//! | Account        | GET    | `/v1/account`        |
//! | Positions      | GET    | `/v1/positions`      |
//! | List orders    | GET    | `/v1/orders`         |
//! | Get order      | GET    | `/v1/orders/{id}`    |
//! | Place order    | POST   | `/v1/orders`         |
//! | Cancel order   | DELETE | `/v1/orders/{id}`    |
//! | Cancel all     | DELETE | `/v1/orders`         |
//!
//! Every request is signed per attempt (see [`crate::auth`]), so retried
//! requests never replay a stale timestamp. All methods take `&self` and are
//! safe to call concurrently.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

use meridian_core::config::AppConfig;
use meridian_core::error::MeridianError;
use meridian_core::paginate::{self, Page, PageCursor, PageEnvelope};
use meridian_core::rest::RestClient;
use meridian_core::retry::RateLimit;
use meridian_core::time_util::now_ms;
use meridian_core::types::{Account, Order, OrderRequest, Position, join_symbols};

use crate::auth::signed_query_pairs;

/// Filter for the paginated order listing.
#[derive(Debug, Clone, Default)]
pub struct ListOrdersRequest {
    /// `"open"`, `"closed"`, or `None` for all.
    pub status: Option<String>,
    /// Restrict to these symbols; empty means all.
    pub symbols: Vec<String>,
    /// Per-call page size override.
    pub limit: Option<u32>,
}

impl ListOrdersRequest {
    pub fn open() -> Self {
        Self {
            status: Some("open".to_string()),
            ..Self::default()
        }
    }

    fn base_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(ref status) = self.status {
            params.push(("status".to_string(), status.clone()));
        }
        if !self.symbols.is_empty() {
            params.push(("symbols".to_string(), join_symbols(&self.symbols)));
        }
        params
    }
}

/// Account and order management client.
pub struct TradingClient {
    rest: Arc<RestClient>,
    secret: String,
    default_page_size: u32,
}

impl TradingClient {
    pub fn new(config: &AppConfig) -> Result<Self, MeridianError> {
        let (key, secret) = config.credentials.resolve()?;
        Ok(Self {
            rest: Arc::new(RestClient::new(
                config.endpoints.rest_url.clone(),
                key,
                config.throttle.clone(),
            )),
            secret,
            default_page_size: config.pagination.page_size,
        })
    }

    /// Most recent rate-limit standing observed on this client.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rest.rate_limit()
    }

    /// Signed GET, re-signing with a fresh timestamp on every attempt.
    async fn get_signed<T>(&self, path: &str, params: Vec<(String, String)>) -> Result<T, MeridianError>
    where
        T: DeserializeOwned,
    {
        let secret = self.secret.clone();
        self.rest
            .request_with(Method::GET, path, move |rb| {
                rb.query(&signed_query_pairs(params.clone(), &secret, now_ms()))
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    /// Fetch the account snapshot.
    pub async fn account(&self) -> Result<Account, MeridianError> {
        self.get_signed("/v1/account", Vec::new()).await
    }

    /// Fetch all open positions.
    pub async fn positions(&self) -> Result<Vec<Position>, MeridianError> {
        self.get_signed("/v1/positions", Vec::new()).await
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Submit a new order. A `client_order_id` is generated when the request
    /// does not carry one, so retries stay idempotent server-side.
    pub async fn place_order(&self, request: &OrderRequest) -> Result<Order, MeridianError> {
        let mut request = request.clone();
        if request.client_order_id.is_none() {
            request.client_order_id = Some(Uuid::new_v4().to_string());
        }
        let body = serde_json::to_value(&request)
            .map_err(|e| MeridianError::Parse(format!("unserializable order: {e}")))?;

        let secret = self.secret.clone();
        let order: Order = self
            .rest
            .request_with(Method::POST, "/v1/orders", move |rb| {
                rb.query(&signed_query_pairs(Vec::new(), &secret, now_ms()))
                    .json(&body)
            })
            .await?;

        info!(
            "order placed: {} {:?} qty={} → id={}",
            order.symbol, order.side, order.qty, order.id,
        );
        Ok(order)
    }

    /// Fetch one order by server-assigned id.
    pub async fn get_order(&self, order_id: &str) -> Result<Order, MeridianError> {
        self.get_signed(&format!("/v1/orders/{order_id}"), Vec::new())
            .await
    }

    /// Cancel one order.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), MeridianError> {
        let secret = self.secret.clone();
        self.rest
            .request_empty(Method::DELETE, &format!("/v1/orders/{order_id}"), move |rb| {
                rb.query(&signed_query_pairs(Vec::new(), &secret, now_ms()))
            })
            .await?;
        info!("order cancelled: {order_id}");
        Ok(())
    }

    /// Cancel every open order.
    pub async fn cancel_all_orders(&self) -> Result<(), MeridianError> {
        let secret = self.secret.clone();
        self.rest
            .request_empty(Method::DELETE, "/v1/orders", move |rb| {
                rb.query(&signed_query_pairs(Vec::new(), &secret, now_ms()))
            })
            .await?;
        info!("all open orders cancelled");
        Ok(())
    }

    /// Lazy batches of orders, one per fetched page.
    pub fn order_pages(
        &self,
        request: &ListOrdersRequest,
    ) -> BoxStream<'static, Result<Vec<Order>, MeridianError>> {
        let rest = Arc::clone(&self.rest);
        let secret = self.secret.clone();
        let base_params = request.base_params();
        let cursor = PageCursor::new(Some(request.limit.unwrap_or(self.default_page_size)));

        paginate::pages(cursor, move |cursor: PageCursor| {
            let rest = Arc::clone(&rest);
            let secret = secret.clone();
            let mut params = base_params.clone();
            async move {
                if let Some(size) = cursor.page_size {
                    params.push(("limit".to_string(), size.to_string()));
                }
                if let Some(token) = cursor.token {
                    params.push(("page_token".to_string(), token));
                }
                let mut envelope: PageEnvelope = rest
                    .request_with(Method::GET, "/v1/orders", move |rb| {
                        rb.query(&signed_query_pairs(params.clone(), &secret, now_ms()))
                    })
                    .await?;
                let items: Vec<Order> = envelope.take("orders")?;
                Ok(Page {
                    items,
                    next_token: envelope.next_page_token,
                })
            }
        })
        .boxed()
    }

    /// Lazy flat sequence of orders across all pages.
    pub fn orders(
        &self,
        request: &ListOrdersRequest,
    ) -> BoxStream<'static, Result<Order, MeridianError>> {
        paginate::flatten_batches(self.order_pages(request)).boxed()
    }
}
