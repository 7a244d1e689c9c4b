// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side { Buy, Sell }

impl Side {
    pub fn sign(&self) -> f64 { match self { Side::Buy => 1.0, Side::Sell => -1.0 } }
    /// Contrarian direction: the order we open against a cascade on this side.
    pub fn flip(&self) -> Side { match self { Side::Buy => Side::Sell, Side::Sell => Side::Buy } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "Buy", Side::Sell => "Sell" } }
    pub fn from_venue(s: &str) -> Option<Side> {
        match s {
            "Buy" | "BUY" => Some(Side::Buy),
            "Sell" | "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// One forced closure reported by the venue's public stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationObs { pub symbol: String, pub side: Side, pub price: f64, pub volume: f64 }

impl LiquidationObs {
    pub fn notional(&self) -> f64 { self.price * self.volume }
}

/// Batch as delivered by the stream (Bybit pushes arrays per topic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent { pub ts_ms: i64, pub observations: Vec<LiquidationObs> }

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InstrumentRules { pub qty_step: f64, pub min_qty: f64, pub price_tick: f64 }

/// Detector -> execution gate: open a contrarian position on `side`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest { pub symbol: String, pub side: Side }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub size: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseKind { TakeProfit, StopLoss, Manual }

impl CloseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseKind::TakeProfit => "take_profit",
            CloseKind::StopLoss => "stop_loss",
            CloseKind::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl: f64,
    pub closed_at: DateTime<Utc>,
    pub kind: CloseKind,
}

/// Everything the JSONL recorder can persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Liq(LiquidationObs),
    Submitted(TrackedPosition),
    Closed(ClosedTrade),
    Note(String),
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
