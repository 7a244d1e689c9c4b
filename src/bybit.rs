// ===============================
// src/bybit.rs
// ===============================
//
// Bybit v5 surface: HMAC signer, wire models (REST + public WS), and the
// REST client behind the Exchange trait. Linear perps only (category is
// pinned to "linear").
//
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::{InstrumentRules, Side};
use crate::exchange::{Exchange, ExchangeError, OrderParams, PositionInfo};

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// v5 signature: hex(HMAC-SHA256(secret, timestamp + key + recvWindow + payload))
pub fn sign_v5(secret: &str, timestamp: u64, api_key: &str, recv_window: u64, payload: &str) -> String {
    let msg = format!("{timestamp}{api_key}{recv_window}{payload}");
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC key");
    mac.update(msg.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Decimal places implied by a step/tick (0.001 -> 3), for wire formatting.
pub fn step_decimals(step: f64) -> usize {
    let mut s = step;
    let mut d = 0;
    while d < 8 && s.fract().abs() > 1e-9 {
        s *= 10.0;
        d += 1;
    }
    d
}

pub fn fmt_step(value: f64, step: f64) -> String {
    format!("{:.*}", step_decimals(step), value)
}

// ---- REST wire models ----
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RestEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    #[serde(default)]
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TickerItem {
    #[allow(dead_code)]
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
}

#[derive(Debug, Deserialize)]
struct LotSizeFilter {
    #[serde(rename = "qtyStep")]
    qty_step: String,
    #[serde(rename = "minOrderQty")]
    min_order_qty: String,
}

#[derive(Debug, Deserialize)]
struct PriceFilter {
    #[serde(rename = "tickSize")]
    tick_size: String,
}

#[derive(Debug, Deserialize)]
struct InstrumentItem {
    #[allow(dead_code)]
    symbol: String,
    #[serde(rename = "lotSizeFilter")]
    lot_size_filter: LotSizeFilter,
    #[serde(rename = "priceFilter")]
    price_filter: PriceFilter,
}

#[derive(Debug, Deserialize)]
struct PositionItem {
    #[allow(dead_code)]
    symbol: String,
    side: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct OrderCreateResult {
    #[serde(rename = "orderId", default)]
    #[allow(dead_code)]
    order_id: String,
}

// ---- Public WS models (allLiquidation topic) ----
// Control frames ({"op":"pong"}, subscribe acks) deserialize with topic=None.
#[derive(Debug, Deserialize)]
pub struct WsLiqEnvelope {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub data: Option<Vec<WsLiqItem>>,
}

#[derive(Debug, Deserialize)]
pub struct WsLiqItem {
    #[serde(rename = "T")]
    pub ts_ms: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "p")]
    pub price: String,
}

// ---- REST client ----
pub struct BybitClient {
    http: reqwest::Client,
    rest_base: String,
    api_key: String,
    api_secret: String,
    recv_window: u64,
}

impl BybitClient {
    pub fn new(rest_base: String, api_key: String, api_secret: String, recv_window: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_base,
            api_key,
            api_secret,
            recv_window,
        }
    }

    pub fn from_env(rest_base: String) -> Self {
        let api_key = std::env::var("BYBIT_API_KEY").unwrap_or_default();
        let api_secret = std::env::var("BYBIT_API_SECRET").unwrap_or_default();
        let recv_window = std::env::var("BYBIT_RECV_WINDOW")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        Self::new(rest_base, api_key, api_secret, recv_window)
    }

    async fn get_public<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<RestEnvelope<T>, ExchangeError> {
        let qs = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}{}?{}", self.rest_base, path, qs);
        let rsp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        rsp.json::<RestEnvelope<T>>()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<RestEnvelope<T>, ExchangeError> {
        let qs = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let ts = timestamp_ms();
        let sig = sign_v5(&self.api_secret, ts, &self.api_key, self.recv_window, &qs);
        let url = format!("{}{}?{}", self.rest_base, path, qs);
        let rsp = self
            .http
            .get(url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", ts.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window.to_string())
            .header("X-BAPI-SIGN", sig)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        rsp.json::<RestEnvelope<T>>()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<RestEnvelope<T>, ExchangeError> {
        let body_str = body.to_string();
        let ts = timestamp_ms();
        let sig = sign_v5(&self.api_secret, ts, &self.api_key, self.recv_window, &body_str);
        let url = format!("{}{}", self.rest_base, path);
        let rsp = self
            .http
            .post(url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", ts.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window.to_string())
            .header("X-BAPI-SIGN", sig)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        rsp.json::<RestEnvelope<T>>()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))
    }
}

fn parse_f64(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(0.0)
}

#[async_trait]
impl Exchange for BybitClient {
    async fn ticker(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let env: RestEnvelope<ListResult<TickerItem>> = self
            .get_public("/v5/market/tickers", &[("category", "linear"), ("symbol", symbol)])
            .await?;
        if env.ret_code != 0 {
            return Err(ExchangeError::PriceUnavailable(env.ret_msg));
        }
        let price = env
            .result
            .and_then(|r| r.list.into_iter().next())
            .map(|t| parse_f64(&t.last_price))
            .filter(|p| *p > 0.0);
        price.ok_or_else(|| ExchangeError::PriceUnavailable(symbol.to_string()))
    }

    async fn instrument_rules(&self, symbol: &str) -> Result<InstrumentRules, ExchangeError> {
        let env: RestEnvelope<ListResult<InstrumentItem>> = self
            .get_public(
                "/v5/market/instruments-info",
                &[("category", "linear"), ("symbol", symbol)],
            )
            .await?;
        if env.ret_code != 0 {
            return Err(ExchangeError::Transport(env.ret_msg));
        }
        let item = env
            .result
            .and_then(|r| r.list.into_iter().next())
            .ok_or_else(|| ExchangeError::InstrumentNotFound(symbol.to_string()))?;
        Ok(InstrumentRules {
            qty_step: parse_f64(&item.lot_size_filter.qty_step),
            min_qty: parse_f64(&item.lot_size_filter.min_order_qty),
            price_tick: parse_f64(&item.price_filter.tick_size),
        })
    }

    async fn position(&self, symbol: &str) -> Result<Option<PositionInfo>, ExchangeError> {
        let env: RestEnvelope<ListResult<PositionItem>> = self
            .get_signed("/v5/position/list", &[("category", "linear"), ("symbol", symbol)])
            .await?;
        if env.ret_code != 0 {
            return Err(ExchangeError::Transport(env.ret_msg));
        }
        let info = env
            .result
            .and_then(|r| r.list.into_iter().next())
            .and_then(|p| {
                let size = parse_f64(&p.size);
                // side is "None" when flat
                Side::from_venue(&p.side)
                    .filter(|_| size > 0.0)
                    .map(|side| PositionInfo { side, size })
            });
        Ok(info)
    }

    async fn submit_order(&self, params: &OrderParams) -> Result<(), ExchangeError> {
        let link_id = format!("casc-{}-{}", timestamp_ms(), rand::thread_rng().gen::<u32>());
        let body = serde_json::json!({
            "category": "linear",
            "symbol": params.symbol,
            "side": params.side.as_str(),
            "orderType": "Market",
            "qty": fmt_step(params.qty, params.rules.qty_step),
            "takeProfit": fmt_step(params.take_profit, params.rules.price_tick),
            "stopLoss": fmt_step(params.stop_loss, params.rules.price_tick),
            "orderLinkId": link_id,
        });
        let env: RestEnvelope<OrderCreateResult> = self.post_signed("/v5/order/create", &body).await?;
        if env.ret_code != 0 {
            return Err(ExchangeError::OrderRejected(format!(
                "retCode={} {}",
                env.ret_code, env.ret_msg
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable() {
        let sig = sign_v5("secret", 1_700_000_000_000, "key", 5000, "category=linear");
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, sign_v5("secret", 1_700_000_000_000, "key", 5000, "category=linear"));
    }

    #[test]
    fn step_decimals_from_step() {
        assert_eq!(step_decimals(1.0), 0);
        assert_eq!(step_decimals(0.1), 1);
        assert_eq!(step_decimals(0.001), 3);
        assert_eq!(fmt_step(0.30000000000004, 0.001), "0.300");
    }

    #[test]
    fn liq_envelope_parses_data_push() {
        let raw = r#"{"topic":"allLiquidation.BTCUSDT","type":"snapshot","ts":1739502302929,
            "data":[{"T":1739502302929,"s":"BTCUSDT","S":"Sell","v":"0.014","p":"9910.5"}]}"#;
        let env: WsLiqEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.topic.as_deref(), Some("allLiquidation.BTCUSDT"));
        let items = env.data.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].symbol, "BTCUSDT");
        assert_eq!(items[0].side, "Sell");
    }

    #[test]
    fn liq_envelope_tolerates_control_frames() {
        let raw = r#"{"success":true,"ret_msg":"pong","op":"ping"}"#;
        let env: WsLiqEnvelope = serde_json::from_str(raw).unwrap();
        assert!(env.topic.is_none());
        assert!(env.data.is_none());
    }
}
