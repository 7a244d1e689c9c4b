// ===============================
// src/exchange.rs
// ===============================
//
// Venue seam. The gate and the tracker only ever talk to this trait, so
// tests run against stubs and mock mode runs against the paper venue.
//
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{InstrumentRules, Side};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("instrument not found: {0}")]
    InstrumentNotFound(String),
    #[error("price unavailable: {0}")]
    PriceUnavailable(String),
    #[error("order rejected: {0}")]
    OrderRejected(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// Net position as reported by the venue.
#[derive(Debug, Clone, Copy)]
pub struct PositionInfo {
    pub side: Side,
    pub size: f64,
}

/// Market order with an attached TP/SL bracket. Carries the instrument
/// rules so clients can format qty/price fields to the venue's decimals.
#[derive(Debug, Clone)]
pub struct OrderParams {
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub rules: InstrumentRules,
}

#[async_trait]
pub trait Exchange: Send + Sync {
    async fn ticker(&self, symbol: &str) -> Result<f64, ExchangeError>;
    async fn instrument_rules(&self, symbol: &str) -> Result<InstrumentRules, ExchangeError>;
    /// None when the venue reports no open position for the symbol.
    async fn position(&self, symbol: &str) -> Result<Option<PositionInfo>, ExchangeError>;
    async fn submit_order(&self, params: &OrderParams) -> Result<(), ExchangeError>;
}
