use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::{
    format_decimal, AccountMirror, CandleSource, ExchangeOrderStatus, FillDetail, LotSize,
    NewOrder, OrderGateway, OrderReport,
};
use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::models::{Balances, Candle, OrderKind, Side};

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance error codes that mean the credentials are wrong
const AUTH_ERROR_CODES: &[i64] = &[-1022, -2008, -2014, -2015];
/// "Order does not exist"
const UNKNOWN_ORDER_CODE: i64 = -2013;
/// "Unknown order sent", returned when cancelling a closed or missing order
const CANCEL_REJECTED_CODE: i64 = -2011;

/// Binance spot REST client (mainnet or testnet)
///
/// Cloneable; clones share the HTTP pool and the rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    symbol: String,
    order_id: i64,
    client_order_id: String,
    #[serde(default)]
    transact_time: Option<i64>,
    #[serde(default)]
    update_time: Option<i64>,
    executed_qty: String,
    cummulative_quote_qty: String,
    status: String,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    #[serde(default)]
    fills: Vec<RawFill>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFill {
    price: String,
    qty: String,
    commission: String,
    commission_asset: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<serde_json::Value>,
}

// ============== Parsing ==============

fn parse_f64(field: &str, value: &str) -> Result<f64, ExchangeError> {
    value
        .parse::<f64>()
        .map_err(|_| ExchangeError::Decode(format!("{} is not a number: {:?}", field, value)))
}

fn parse_millis(field: &str, millis: i64) -> Result<DateTime<Utc>, ExchangeError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ExchangeError::Decode(format!("{} out of range: {}", field, millis)))
}

/// Kline rows are positional arrays: [openTime, open, high, low, close, volume, closeTime, ...]
fn parse_kline(row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    if row.len() < 7 {
        return Err(ExchangeError::Decode(format!(
            "kline row has {} fields",
            row.len()
        )));
    }

    let millis = |i: usize| {
        row[i]
            .as_i64()
            .ok_or_else(|| ExchangeError::Decode(format!("kline field {} is not a timestamp", i)))
    };
    let number = |i: usize| match &row[i] {
        serde_json::Value::String(s) => parse_f64("kline", s),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExchangeError::Decode(format!("kline field {}", i))),
        other => Err(ExchangeError::Decode(format!(
            "kline field {} unexpected: {}",
            i, other
        ))),
    };

    Ok(Candle {
        open_time: parse_millis("openTime", millis(0)?)?,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(5)?,
        close_time: parse_millis("closeTime", millis(6)?)?,
    })
}

impl TryFrom<RawOrder> for OrderReport {
    type Error = ExchangeError;

    fn try_from(raw: RawOrder) -> Result<Self, Self::Error> {
        let status = ExchangeOrderStatus::parse(&raw.status)
            .ok_or_else(|| ExchangeError::Decode(format!("unknown order status {}", raw.status)))?;
        let side = Side::parse(&raw.side)
            .ok_or_else(|| ExchangeError::Decode(format!("unknown order side {}", raw.side)))?;

        let fills = raw
            .fills
            .iter()
            .map(|f| {
                Ok(FillDetail {
                    price: parse_f64("fill price", &f.price)?,
                    quantity: parse_f64("fill qty", &f.qty)?,
                    commission: parse_f64("commission", &f.commission)?,
                    commission_asset: f.commission_asset.clone(),
                })
            })
            .collect::<Result<Vec<_>, ExchangeError>>()?;

        let transact_time = match raw.transact_time.or(raw.update_time) {
            Some(ms) => Some(parse_millis("transactTime", ms)?),
            None => None,
        };

        Ok(OrderReport {
            exchange_order_id: raw.order_id,
            client_order_id: raw.client_order_id,
            symbol: raw.symbol,
            side,
            order_type: raw.order_type,
            status,
            executed_quantity: parse_f64("executedQty", &raw.executed_qty)?,
            cumulative_quote_quantity: parse_f64("cummulativeQuoteQty", &raw.cummulative_quote_qty)?,
            fills,
            transact_time,
        })
    }
}

// ============== Implementation ==============

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::Connection(format!("failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            base_url: config.resolved_base_url(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            rate_limiter,
        })
    }

    /// Point the client at another host (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }

    /// Connectivity check
    /// Endpoint: GET /api/v3/ping
    pub async fn ping(&self) -> Result<(), ExchangeError> {
        self.public_get("/api/v3/ping", &[]).await?;
        Ok(())
    }

    /// LOT_SIZE filter for a symbol
    /// Endpoint: GET /api/v3/exchangeInfo?symbol={symbol}
    pub async fn lot_size(&self, symbol: &str) -> Result<LotSize, ExchangeError> {
        let response = self
            .public_get("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;
        let info: ExchangeInfo = response.json().await?;

        let filters = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .map(|s| s.filters)
            .ok_or_else(|| ExchangeError::Decode(format!("symbol {} not listed", symbol)))?;

        let lot = filters
            .iter()
            .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some("LOT_SIZE"))
            .ok_or_else(|| ExchangeError::Decode(format!("no LOT_SIZE filter for {}", symbol)))?;

        let decimal = |key: &str| -> Result<Decimal, ExchangeError> {
            let raw = lot
                .get(key)
                .and_then(|v| v.as_str())
                .ok_or_else(|| ExchangeError::Decode(format!("LOT_SIZE missing {}", key)))?;
            Decimal::from_str(raw)
                .map_err(|e| ExchangeError::Decode(format!("LOT_SIZE {} {:?}: {}", key, raw, e)))
        };

        Ok(LotSize {
            min_qty: decimal("minQty")?,
            max_qty: decimal("maxQty")?,
            step_size: decimal("stepSize")?,
        })
    }

    async fn public_get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Response, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;
        check_response(response).await
    }

    /// Send a request carrying timestamp, recvWindow and an HMAC-SHA256 signature
    async fn signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Response, ExchangeError> {
        let (api_key, api_secret) = match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => (key, secret),
            _ => {
                return Err(ExchangeError::Authentication(
                    "API key and secret are not configured".to_string(),
                ))
            }
        };

        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        query.push(format!("recvWindow={}", self.recv_window_ms));
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let query = query.join("&");
        let signature = sign(api_secret, &query)?;

        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query, signature
        );
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;
        check_response(response).await
    }
}

fn sign(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Authentication(format!("invalid API secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Map non-2xx responses onto the retry taxonomy
async fn check_response(response: Response) -> Result<Response, ExchangeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let api_error = serde_json::from_str::<ApiErrorBody>(&body).ok();
    let message = api_error
        .as_ref()
        .map(|e| e.msg.clone())
        .unwrap_or_else(|| body.clone());

    let code = status.as_u16();
    if code == 429 || code == 418 {
        return Err(ExchangeError::RateLimited {
            status: code,
            message,
        });
    }
    if status.is_server_error() {
        return Err(ExchangeError::Server {
            status: code,
            message,
        });
    }
    if code == 401 || api_error.as_ref().is_some_and(|e| AUTH_ERROR_CODES.contains(&e.code)) {
        return Err(ExchangeError::Authentication(message));
    }

    Err(ExchangeError::Rejected {
        code: api_error.map(|e| e.code).unwrap_or(i64::from(code)),
        message,
    })
}

#[async_trait]
impl CandleSource for BinanceClient {
    /// Endpoint: GET /api/v3/klines?symbol={symbol}&interval={interval}&limit={limit}
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let response = self
            .public_get(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        let candles = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(symbol, interval, count = candles.len(), "fetched klines");
        Ok(candles)
    }
}

#[async_trait]
impl AccountMirror for BinanceClient {
    /// Endpoint: GET /api/v3/account (signed)
    async fn current_balances(&self, base: &str, quote: &str) -> Result<Balances, ExchangeError> {
        let response = self.signed(Method::GET, "/api/v3/account", &[]).await?;
        let account: AccountInfo = response.json().await?;

        let free = |asset: &str| -> Result<f64, ExchangeError> {
            match account.balances.iter().find(|b| b.asset == asset) {
                Some(balance) => parse_f64("free balance", &balance.free),
                None => Ok(0.0),
            }
        };

        Ok(Balances {
            quote_balance: free(quote)?,
            base_balance: free(base)?,
        })
    }

    /// Endpoint: GET /api/v3/ticker/price?symbol={symbol}
    async fn last_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let response = self
            .public_get("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        let ticker: TickerPrice = response.json().await?;
        parse_f64("ticker price", &ticker.price)
    }
}

#[async_trait]
impl OrderGateway for BinanceClient {
    /// Endpoint: POST /api/v3/order (signed, newOrderRespType=FULL)
    async fn place_order(&self, order: &NewOrder) -> Result<OrderReport, ExchangeError> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("quantity", format_decimal(order.quantity)),
            ("newClientOrderId", order.client_order_id.clone()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        match order.kind {
            OrderKind::Market => params.push(("type", "MARKET".to_string())),
            OrderKind::Limit { price } => {
                params.push(("type", "LIMIT".to_string()));
                params.push(("timeInForce", "GTC".to_string()));
                params.push(("price", format_decimal(price)));
            }
        }

        let response = self.signed(Method::POST, "/api/v3/order", &params).await?;
        let raw: RawOrder = response.json().await?;
        OrderReport::try_from(raw)
    }

    /// Endpoint: GET /api/v3/order?symbol={symbol}&origClientOrderId={id} (signed)
    async fn query_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderReport>, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("origClientOrderId", client_order_id.to_string()),
        ];

        match self.signed(Method::GET, "/api/v3/order", &params).await {
            Ok(response) => {
                let raw: RawOrder = response.json().await?;
                Ok(Some(OrderReport::try_from(raw)?))
            }
            Err(ExchangeError::Rejected { code, .. }) if code == UNKNOWN_ORDER_CODE => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Endpoint: DELETE /api/v3/order?symbol={symbol}&origClientOrderId={id} (signed)
    async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderReport>, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("origClientOrderId", client_order_id.to_string()),
        ];

        match self.signed(Method::DELETE, "/api/v3/order", &params).await {
            Ok(response) => {
                let raw: RawOrder = response.json().await?;
                let mut report = OrderReport::try_from(raw)?;
                // clientOrderId in a cancel response names the cancel request
                report.client_order_id = client_order_id.to_string();
                Ok(Some(report))
            }
            Err(ExchangeError::Rejected { code, .. })
                if code == CANCEL_REJECTED_CODE || code == UNKNOWN_ORDER_CODE =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
