//! Bybit v5 adapter for USDT-settled linear perpetuals.
//!
//! REST under `/v5`, public ticker stream on the linear WebSocket. Signed
//! requests use the v5 HMAC scheme: `timestamp + api_key + recv_window +
//! payload` signed with SHA-256.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::domain::{Market, Symbol, VenueId};
use crate::error::ExchangeError;

use super::{
    resolve_from_markets, Balance, ExchangeClient, MarginMode, Order, OrderId, OrderRequest,
    OrderSide, OrderStatus, Position, PositionSide, Tick, TickerStream,
};

const REST_URL: &str = "https://api.bybit.com";
const WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";
const CATEGORY: &str = "linear";
const WS_PING_INTERVAL: Duration = Duration::from_secs(20);

// retCode values the v5 API returns for "already in the requested state".
const RET_OK: i64 = 0;
const RET_LEVERAGE_NOT_MODIFIED: i64 = 110043;
const RET_POSITION_MODE_NOT_MODIFIED: i64 = 110025;
const RET_MARGIN_MODE_NOT_MODIFIED: i64 = 110026;

type HmacSha256 = Hmac<Sha256>;

/// Construction parameters for [`BybitClient`].
#[derive(Debug, Clone)]
pub struct BybitParams {
    pub venue: VenueId,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: u64,
    /// Taker fee assumed for P&L; instruments-info does not report fees.
    pub taker_fee: Decimal,
    /// Leverage sent with the isolated-margin switch; the venue requires
    /// leverage values on that call.
    pub leverage: u32,
    pub rest_timeout: Duration,
}

/// Bybit v5 venue adapter.
pub struct BybitClient {
    venue: VenueId,
    http: reqwest::Client,
    rest_url: String,
    ws_url: String,
    params: BybitParams,
    markets: RwLock<HashMap<String, Market>>,
    /// Milliseconds added to the local clock when signing.
    clock_offset_ms: AtomicI64,
}

impl BybitClient {
    pub fn new(params: BybitParams) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder()
            .timeout(params.rest_timeout)
            .build()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        Ok(Self {
            venue: params.venue.clone(),
            http,
            rest_url: REST_URL.to_string(),
            ws_url: WS_URL.to_string(),
            params,
            markets: RwLock::new(HashMap::new()),
            clock_offset_ms: AtomicI64::new(0),
        })
    }

    /// Override endpoints, for tests against a local stub.
    pub fn with_endpoints(mut self, rest_url: String, ws_url: String) -> Self {
        self.rest_url = rest_url;
        self.ws_url = ws_url;
        self
    }

    /// Apply a clock offset estimated against venue time endpoints.
    pub fn set_clock_offset_ms(&self, offset_ms: i64) {
        self.clock_offset_ms.store(offset_ms, Ordering::Relaxed);
    }

    fn signing_timestamp(&self) -> i64 {
        Utc::now().timestamp_millis() + self.clock_offset_ms.load(Ordering::Relaxed)
    }

    fn sign(&self, timestamp: i64, payload: &str) -> String {
        let prehash = format!(
            "{timestamp}{}{}{payload}",
            self.params.api_key, self.params.recv_window_ms
        );
        let mut mac = HmacSha256::new_from_slice(self.params.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(prehash.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn map_http_error(&self, err: reqwest::Error) -> ExchangeError {
        if err.is_timeout() {
            ExchangeError::Timeout(self.params.rest_timeout.as_secs())
        } else {
            ExchangeError::Network(err.to_string())
        }
    }

    fn map_ret_code(code: i64, msg: &str) -> ExchangeError {
        match code {
            10002 => ExchangeError::Timeout(10),
            10006 | 10018 => ExchangeError::RateLimited(msg.to_string()),
            10003 | 10004 | 10005 | 33004 => ExchangeError::Auth(msg.to_string()),
            10001 => ExchangeError::BadRequest(msg.to_string()),
            110007 | 110012 | 110052 => ExchangeError::InsufficientFunds(msg.to_string()),
            110001 => ExchangeError::OrderNotFound(msg.to_string()),
            10029 | 110009 => ExchangeError::SymbolNotFound(msg.to_string()),
            110013 | 110028 => ExchangeError::LeverageRejected(msg.to_string()),
            _ => ExchangeError::Protocol(format!("retCode {code}: {msg}")),
        }
    }

    async fn get_public<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{path}?{query}", self.rest_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_http_error(e))?;
        Self::decode_envelope(response).await
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, ExchangeError> {
        let timestamp = self.signing_timestamp();
        let signature = self.sign(timestamp, query);
        let url = format!("{}{path}?{query}", self.rest_url);
        let response = self
            .http
            .get(&url)
            .header("X-BAPI-API-KEY", &self.params.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.params.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .map_err(|e| self.map_http_error(e))?;
        Self::decode_envelope(response).await
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ExchangeError> {
        let body_text = body.to_string();
        let timestamp = self.signing_timestamp();
        let signature = self.sign(timestamp, &body_text);
        let url = format!("{}{path}", self.rest_url);
        let response = self
            .http
            .post(&url)
            .header("X-BAPI-API-KEY", &self.params.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.params.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(body_text)
            .send()
            .await
            .map_err(|e| self.map_http_error(e))?;
        Self::decode_envelope(response).await
    }

    async fn decode_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ExchangeError::RateLimited("HTTP 429".into()));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ExchangeError::Auth(format!("HTTP {status}")));
        }
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ExchangeError::Protocol(e.to_string()))?;
        if envelope.ret_code != RET_OK {
            return Err(Self::map_ret_code(envelope.ret_code, &envelope.ret_msg));
        }
        envelope
            .result
            .ok_or_else(|| ExchangeError::Protocol("missing result".into()))
    }

    /// Treat "already in requested state" retCodes as success.
    fn idempotent_ok(result: Result<serde_json::Value, ExchangeError>, codes: &[i64]) -> Result<(), ExchangeError> {
        match result {
            Ok(_) => Ok(()),
            Err(ExchangeError::Protocol(msg)) => {
                if codes.iter().any(|c| msg.contains(&format!("retCode {c}"))) {
                    Ok(())
                } else {
                    Err(ExchangeError::Protocol(msg))
                }
            }
            Err(other) => Err(other),
        }
    }

    fn markets_loaded(&self) -> bool {
        !self.markets.read().is_empty()
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    async fn load_markets(&self) -> Result<(), ExchangeError> {
        let result: InstrumentsResult = self
            .get_public(
                "/v5/market/instruments-info",
                &format!("category={CATEGORY}&limit=1000"),
            )
            .await?;

        let mut map = HashMap::new();
        for instrument in result.list {
            if instrument.contract_type != "LinearPerpetual"
                || instrument.quote_coin != "USDT"
                || instrument.status != "Trading"
            {
                continue;
            }
            let Some(symbol) = Symbol::parse(&instrument.base_coin) else {
                continue;
            };
            let market = Market {
                venue: self.venue.clone(),
                symbol,
                native_symbol: instrument.symbol.clone(),
                price_tick: instrument.price_filter.tick_size,
                lot_step: instrument.lot_size_filter.qty_step,
                min_qty: instrument.lot_size_filter.min_order_qty,
                min_notional: instrument.lot_size_filter.min_notional_value,
                taker_fee: self.params.taker_fee,
            };
            map.insert(instrument.symbol, market);
        }
        debug!(venue = %self.venue, markets = map.len(), "Markets loaded");
        *self.markets.write() = map;
        Ok(())
    }

    async fn market(&self, native_symbol: &str) -> Result<Market, ExchangeError> {
        if !self.markets_loaded() {
            self.load_markets().await?;
        }
        self.markets
            .read()
            .get(native_symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::SymbolNotFound(native_symbol.to_string()))
    }

    async fn resolve_symbol(&self, base: &Symbol) -> Result<String, ExchangeError> {
        if !self.markets_loaded() {
            self.load_markets().await?;
        }
        let markets = self.markets.read();
        resolve_from_markets(base, &markets)
            .ok_or_else(|| ExchangeError::SymbolNotFound(base.to_string()))
    }

    async fn server_time(&self) -> Result<DateTime<Utc>, ExchangeError> {
        let result: ServerTimeResult = self.get_public("/v5/market/time", "").await?;
        let nanos: i64 = result
            .time_nano
            .parse()
            .map_err(|_| ExchangeError::Protocol("bad timeNano".into()))?;
        Ok(Utc.timestamp_nanos(nanos))
    }

    fn set_clock_offset(&self, offset_ms: i64) {
        self.set_clock_offset_ms(offset_ms);
    }

    async fn watch_ticker(&self, native_symbol: &str) -> Result<TickerStream, ExchangeError> {
        let (ws, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        let (mut sink, mut source) = ws.split();

        let topic = format!("tickers.{native_symbol}");
        let subscribe = json!({ "op": "subscribe", "args": [topic] }).to_string();
        sink.send(Message::Text(subscribe.into()))
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        let venue = self.venue.clone();
        let symbol = native_symbol.to_string();

        tokio::spawn(async move {
            let mut ping = tokio::time::interval(WS_PING_INTERVAL);
            ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ping.tick() => {
                        let ping_msg = json!({ "op": "ping" }).to_string();
                        if sink.send(Message::Text(ping_msg.into())).await.is_err() {
                            let _ = tx.send(Err(ExchangeError::Network("ping failed".into()))).await;
                            break;
                        }
                    }
                    frame = source.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(tick) = parse_ticker_frame(&text) {
                                    if tx.send(Ok(tick)).await.is_err() {
                                        // Stream consumer dropped; stop the socket task.
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = tx
                                    .send(Err(ExchangeError::Network("socket closed".into())))
                                    .await;
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                let _ = tx.send(Err(ExchangeError::Network(e.to_string()))).await;
                                break;
                            }
                        }
                    }
                }
            }
            debug!(venue = %venue, symbol = %symbol, "Ticker socket task ended");
        });

        Ok(TickerStream::new(rx))
    }

    async fn fetch_ticker(&self, native_symbol: &str) -> Result<Decimal, ExchangeError> {
        let result: TickersResult = self
            .get_public(
                "/v5/market/tickers",
                &format!("category={CATEGORY}&symbol={native_symbol}"),
            )
            .await?;
        let entry = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::SymbolNotFound(native_symbol.to_string()))?;
        entry
            .last_price
            .parse()
            .map_err(|_| ExchangeError::Protocol("bad lastPrice".into()))
    }

    async fn fetch_balance(&self) -> Result<Balance, ExchangeError> {
        let result: WalletBalanceResult = self
            .get_signed("/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;

        // No USDT pool in the response means zero free balance, never a
        // fabricated value.
        let Some(coin) = result
            .list
            .into_iter()
            .flat_map(|account| account.coin)
            .find(|c| c.coin == "USDT")
        else {
            warn!(venue = %self.venue, "No USDT pool in wallet balance");
            return Ok(Balance::default());
        };

        let total = parse_decimal_or_zero(&coin.wallet_balance);
        let free = coin
            .available_to_withdraw
            .as_deref()
            .map(parse_decimal_or_zero)
            .filter(|d| *d > Decimal::ZERO)
            .unwrap_or(total);
        Ok(Balance {
            free,
            used: (total - free).max(Decimal::ZERO),
            total,
        })
    }

    async fn set_leverage(&self, native_symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let body = json!({
            "category": CATEGORY,
            "symbol": native_symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        let result = self.post_signed("/v5/position/set-leverage", body).await;
        Self::idempotent_ok(result, &[RET_LEVERAGE_NOT_MODIFIED])
    }

    async fn set_margin_mode(
        &self,
        native_symbol: &str,
        mode: MarginMode,
    ) -> Result<(), ExchangeError> {
        let leverage = self.params.leverage.to_string();
        let body = json!({
            "category": CATEGORY,
            "symbol": native_symbol,
            "tradeMode": match mode { MarginMode::Isolated => 1, MarginMode::Cross => 0 },
            "buyLeverage": leverage,
            "sellLeverage": leverage,
        });
        let result = self.post_signed("/v5/position/switch-isolated", body).await;
        Self::idempotent_ok(result, &[RET_MARGIN_MODE_NOT_MODIFIED])
    }

    async fn set_position_mode(&self, hedged: bool) -> Result<(), ExchangeError> {
        let body = json!({
            "category": CATEGORY,
            "coin": "USDT",
            "mode": if hedged { 3 } else { 0 },
        });
        let result = self.post_signed("/v5/position/switch-mode", body).await;
        Self::idempotent_ok(result, &[RET_POSITION_MODE_NOT_MODIFIED])
    }

    async fn create_limit_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        let body = json!({
            "category": CATEGORY,
            "symbol": request.native_symbol,
            "side": match request.side { OrderSide::Buy => "Buy", OrderSide::Sell => "Sell" },
            "orderType": "Limit",
            "qty": request.quantity.normalize().to_string(),
            "price": request.price.normalize().to_string(),
            "positionIdx": match request.position { PositionSide::Long => 1, PositionSide::Short => 2 },
            "reduceOnly": request.reduce_only,
        });
        let result: CreateOrderResult = self.post_signed("/v5/order/create", body).await?;
        Ok(Order {
            id: OrderId::new(result.order_id),
            native_symbol: request.native_symbol.clone(),
            side: request.side,
            price: request.price,
            quantity: request.quantity,
            status: OrderStatus::Open,
            filled_qty: Decimal::ZERO,
            average_price: None,
        })
    }

    async fn cancel_order(&self, native_symbol: &str, id: &OrderId) -> Result<(), ExchangeError> {
        let body = json!({
            "category": CATEGORY,
            "symbol": native_symbol,
            "orderId": id.as_str(),
        });
        self.post_signed::<serde_json::Value>("/v5/order/cancel", body)
            .await
            .map(|_| ())
    }

    async fn fetch_order(&self, native_symbol: &str, id: &OrderId) -> Result<Order, ExchangeError> {
        let result: OrderListResult = self
            .get_signed(
                "/v5/order/realtime",
                &format!("category={CATEGORY}&symbol={native_symbol}&orderId={id}"),
            )
            .await?;
        let entry = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::OrderNotFound(id.to_string()))?;
        entry.into_order(native_symbol)
    }

    async fn fetch_positions(
        &self,
        native_symbols: &[String],
    ) -> Result<Vec<Position>, ExchangeError> {
        let mut positions = Vec::new();
        for native in native_symbols {
            let result: PositionListResult = self
                .get_signed(
                    "/v5/position/list",
                    &format!("category={CATEGORY}&symbol={native}"),
                )
                .await?;
            for entry in result.list {
                let quantity = parse_decimal_or_zero(&entry.size);
                if quantity == Decimal::ZERO {
                    continue;
                }
                let side = match entry.side.as_str() {
                    "Buy" => PositionSide::Long,
                    "Sell" => PositionSide::Short,
                    _ => continue,
                };
                positions.push(Position {
                    native_symbol: entry.symbol,
                    side,
                    quantity,
                    entry_price: parse_decimal_or_zero(&entry.avg_price),
                    mark_price: entry.mark_price.as_deref().and_then(|p| p.parse().ok()),
                });
            }
        }
        Ok(positions)
    }
}

fn parse_decimal_or_zero(raw: &str) -> Decimal {
    raw.parse().unwrap_or(Decimal::ZERO)
}

/// Extract a tick from a `tickers.*` frame; returns `None` for
/// acknowledgements, pongs, and deltas without a last price.
fn parse_ticker_frame(text: &str) -> Option<Tick> {
    let frame: TickerFrame = serde_json::from_str(text).ok()?;
    if !frame.topic.as_deref()?.starts_with("tickers.") {
        return None;
    }
    let last = frame.data?.last_price?.parse().ok()?;
    let ts = frame
        .ts
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);
    Some(Tick { last, ts })
}

// --- wire types ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ServerTimeResult {
    #[serde(rename = "timeNano")]
    time_nano: String,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResult {
    list: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
struct Instrument {
    symbol: String,
    #[serde(rename = "contractType")]
    contract_type: String,
    status: String,
    #[serde(rename = "baseCoin")]
    base_coin: String,
    #[serde(rename = "quoteCoin")]
    quote_coin: String,
    #[serde(rename = "priceFilter")]
    price_filter: PriceFilter,
    #[serde(rename = "lotSizeFilter")]
    lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Deserialize)]
struct PriceFilter {
    #[serde(rename = "tickSize")]
    tick_size: Decimal,
}

#[derive(Debug, Deserialize)]
struct LotSizeFilter {
    #[serde(rename = "qtyStep")]
    qty_step: Decimal,
    #[serde(rename = "minOrderQty")]
    min_order_qty: Decimal,
    #[serde(rename = "minNotionalValue")]
    min_notional_value: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct TickersResult {
    list: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    #[serde(rename = "lastPrice")]
    last_price: String,
}

#[derive(Debug, Deserialize)]
struct WalletBalanceResult {
    list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    #[serde(default)]
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
struct WalletCoin {
    coin: String,
    #[serde(rename = "walletBalance")]
    wallet_balance: String,
    #[serde(rename = "availableToWithdraw")]
    available_to_withdraw: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResult {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderListResult {
    list: Vec<OrderEntry>,
}

#[derive(Debug, Deserialize)]
struct OrderEntry {
    #[serde(rename = "orderId")]
    order_id: String,
    side: String,
    price: String,
    qty: String,
    #[serde(rename = "orderStatus")]
    order_status: String,
    #[serde(rename = "cumExecQty")]
    cum_exec_qty: String,
    #[serde(rename = "avgPrice", default)]
    avg_price: Option<String>,
}

impl OrderEntry {
    fn into_order(self, native_symbol: &str) -> Result<Order, ExchangeError> {
        let status = match self.order_status.as_str() {
            "New" | "Created" | "Untriggered" => OrderStatus::Open,
            "PartiallyFilled" => OrderStatus::PartiallyFilled,
            "Filled" => OrderStatus::Filled,
            "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" => OrderStatus::Cancelled,
            "Rejected" => OrderStatus::Rejected,
            other => return Err(ExchangeError::Protocol(format!("order status {other}"))),
        };
        Ok(Order {
            id: OrderId::new(self.order_id),
            native_symbol: native_symbol.to_string(),
            side: if self.side == "Buy" {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            },
            price: parse_decimal_or_zero(&self.price),
            quantity: parse_decimal_or_zero(&self.qty),
            status,
            filled_qty: parse_decimal_or_zero(&self.cum_exec_qty),
            average_price: self
                .avg_price
                .as_deref()
                .filter(|p| !p.is_empty())
                .and_then(|p| p.parse().ok()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PositionListResult {
    list: Vec<PositionEntry>,
}

#[derive(Debug, Deserialize)]
struct PositionEntry {
    symbol: String,
    side: String,
    size: String,
    #[serde(rename = "avgPrice")]
    avg_price: String,
    #[serde(rename = "markPrice")]
    mark_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerFrame {
    topic: Option<String>,
    ts: Option<i64>,
    data: Option<TickerFrameData>,
}

#[derive(Debug, Deserialize)]
struct TickerFrameData {
    #[serde(rename = "lastPrice")]
    last_price: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn client() -> BybitClient {
        BybitClient::new(BybitParams {
            venue: VenueId::new("bybit"),
            api_key: "key".into(),
            api_secret: "secret".into(),
            recv_window_ms: 60_000,
            taker_fee: dec!(0.0006),
            leverage: 3,
            rest_timeout: Duration::from_secs(10),
        })
        .unwrap()
    }

    #[test]
    fn signing_is_deterministic() {
        let c = client();
        let a = c.sign(1_700_000_000_000, "category=linear");
        let b = c.sign(1_700_000_000_000, "category=linear");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, c.sign(1_700_000_000_001, "category=linear"));
    }

    #[test]
    fn ticker_frame_parses_snapshot() {
        let text = r#"{"topic":"tickers.FOOUSDT","ts":1700000000000,
            "data":{"lastPrice":"0.02765"}}"#;
        let tick = parse_ticker_frame(text).unwrap();
        assert_eq!(tick.last, dec!(0.02765));
    }

    #[test]
    fn ticker_frame_skips_deltas_without_price() {
        let delta = r#"{"topic":"tickers.FOOUSDT","ts":1,"data":{"volume24h":"5"}}"#;
        assert!(parse_ticker_frame(delta).is_none());
        let ack = r#"{"op":"subscribe","success":true}"#;
        assert!(parse_ticker_frame(ack).is_none());
    }

    #[test]
    fn idempotent_ok_accepts_not_modified() {
        let not_modified: Result<serde_json::Value, ExchangeError> = Err(
            ExchangeError::Protocol("retCode 110043: leverage not modified".into()),
        );
        assert!(BybitClient::idempotent_ok(not_modified, &[RET_LEVERAGE_NOT_MODIFIED]).is_ok());

        let other: Result<serde_json::Value, ExchangeError> =
            Err(ExchangeError::Protocol("retCode 99999: boom".into()));
        assert!(BybitClient::idempotent_ok(other, &[RET_LEVERAGE_NOT_MODIFIED]).is_err());
    }

    #[test]
    fn order_entry_maps_statuses() {
        let entry = OrderEntry {
            order_id: "1".into(),
            side: "Buy".into(),
            price: "1.05".into(),
            qty: "2".into(),
            order_status: "PartiallyFilled".into(),
            cum_exec_qty: "1".into(),
            avg_price: Some("1.049".into()),
        };
        let order = entry.into_order("FOOUSDT").unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_qty, dec!(1));
        assert_eq!(order.settlement_price(), dec!(1.049));
    }

    #[test]
    fn wallet_parse_missing_usdt_is_zero() {
        let raw = r#"{"list":[{"coin":[{"coin":"BTC","walletBalance":"1",
            "availableToWithdraw":"1"}]}]}"#;
        let parsed: WalletBalanceResult = serde_json::from_str(raw).unwrap();
        let usdt = parsed
            .list
            .into_iter()
            .flat_map(|a| a.coin)
            .find(|c| c.coin == "USDT");
        assert!(usdt.is_none());
    }

    #[test]
    fn instruments_parse() {
        let raw = r#"{"list":[{"symbol":"FOOUSDT","contractType":"LinearPerpetual",
            "status":"Trading","baseCoin":"FOO","quoteCoin":"USDT",
            "priceFilter":{"tickSize":"0.0001"},
            "lotSizeFilter":{"qtyStep":"1","minOrderQty":"2","minNotionalValue":"5"}}]}"#;
        let parsed: InstrumentsResult = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.list.len(), 1);
        assert_eq!(parsed.list[0].lot_size_filter.min_order_qty, dec!(2));
    }
}
