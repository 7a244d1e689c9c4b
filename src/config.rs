// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : cascade_bot_rust — contrarian liquidation-cascade engine in Rust
Module  : config.rs
Version : 0.3.0
License : MIT (see LICENSE)

Summary : Streams public liquidation events (mock/Bybit v5), debounces
          same-direction cascades per symbol, opens contrarian market
          orders with TP/SL brackets, polls positions until close,
          aggregates daily PnL stats, exposes Prometheus metrics, and
          records JSONL events.
=============================================================================
*/
use std::env;
use std::time::Duration;

use dotenvy::dotenv;

/// Source of market data / trading venue
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketMode {
    Mock,
    BybitTestnet,
    BybitMainnet,
}

impl MarketMode {
    pub fn from_env(key: &str, default_mode: MarketMode) -> MarketMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "mock"          => MarketMode::Mock,
            "bybit_testnet" => MarketMode::BybitTestnet,
            "bybit_mainnet" => MarketMode::BybitMainnet,
            _ => default_mode,
        }
    }

    // Default endpoints per mode
    pub fn default_ws_url(&self) -> &'static str {
        match self {
            MarketMode::Mock         => "wss://stream-testnet.bybit.com/v5/public/linear", // unused in mock
            MarketMode::BybitTestnet => "wss://stream-testnet.bybit.com/v5/public/linear",
            MarketMode::BybitMainnet => "wss://stream.bybit.com/v5/public/linear",
        }
    }

    pub fn default_rest_url(&self) -> &'static str {
        match self {
            MarketMode::Mock         => "https://api-testnet.bybit.com", // placeholder
            MarketMode::BybitTestnet => "https://api-testnet.bybit.com",
            MarketMode::BybitMainnet => "https://api.bybit.com",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMode::Mock         => "mock",
            MarketMode::BybitTestnet => "bybit_testnet",
            MarketMode::BybitMainnet => "bybit_mainnet",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    // symbols
    pub symbols: Vec<String>, // fixed subscription list, e.g. BTCUSDT,ETHUSDT

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,

    // market mode
    pub feed_mode: MarketMode,
    pub venue_mode: MarketMode,
    pub bybit_ws_url: String,
    pub bybit_rest_url: String,

    // notifications
    pub notify_webhook_url: Option<String>,
    pub notify_recipient: String,
}

/// Engine tuning. Percent envs (TP_PCT/SL_PCT) are stored as fractions.
#[derive(Clone, Debug)]
pub struct Tuning {
    pub min_liq_notional: f64,
    pub big_liq_notional: Option<f64>,
    pub quiescence: Duration,
    pub cache_ttl: Duration,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub order_notional_usd: f64,
    pub tp_frac: f64,
    pub sl_frac: f64,
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default))
}

pub fn load() -> (Args, Tuning) {
    // Make sure .env is read (SYMBOLS, RECORD_FILE, credentials, ...)
    let _ = dotenv();

    // ===== Symbols =====
    // SYMBOLS=BTCUSDT,ETHUSDT,SOLUSDT
    let symbols: Vec<String> = env::var("SYMBOLS")
        .ok()
        .map(|s| {
            s.split(',')
                .map(|x| x.trim())
                .filter(|x| !x.is_empty())
                .map(|x| x.to_ascii_uppercase())
                .collect()
        })
        .filter(|v: &Vec<String>| !v.is_empty())
        .unwrap_or_else(|| vec!["BTCUSDT".to_string()]);

    let record_file = env::var("RECORD_FILE").ok();
    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);

    // ===== Mode =====
    let feed_mode = MarketMode::from_env("FEED_MODE", MarketMode::Mock);
    let venue_mode = MarketMode::from_env("VENUE_MODE", MarketMode::Mock);

    let bybit_ws_url = env::var("BYBIT_WS_URL")
        .unwrap_or_else(|_| feed_mode.default_ws_url().to_string());
    let bybit_rest_url = env::var("BYBIT_REST_URL")
        .unwrap_or_else(|_| venue_mode.default_rest_url().to_string());

    // ===== Notifications =====
    let notify_webhook_url = env::var("NOTIFY_WEBHOOK_URL").ok().filter(|s| !s.is_empty());
    let notify_recipient = env::var("NOTIFY_RECIPIENT").unwrap_or_else(|_| "ops".to_string());

    let args = Args {
        symbols,
        record_file,
        metrics_port,
        feed_mode,
        venue_mode,
        bybit_ws_url,
        bybit_rest_url,
        notify_webhook_url,
        notify_recipient,
    };

    // ===== Tuning =====
    // TP_PCT/SL_PCT are in percent (1.0 = 1%); stored as fractions.
    let tuning = Tuning {
        min_liq_notional: env_f64("MIN_LIQ_NOTIONAL", 1_000.0),
        big_liq_notional: env::var("BIG_LIQ_NOTIONAL").ok().and_then(|s| s.parse().ok()),
        quiescence: env_secs("QUIESCENCE_SECS", 10),
        cache_ttl: env_secs("CACHE_TTL_SECS", 30),
        poll_interval: env_secs("POLL_SECS", 15),
        reconnect_delay: env_secs("RECONNECT_SECS", 5),
        order_notional_usd: env_f64("ORDER_NOTIONAL_USD", 100.0),
        tp_frac: env_f64("TP_PCT", 1.0) / 100.0,
        sl_frac: env_f64("SL_PCT", 0.35) / 100.0,
    };

    (args, tuning)
}
