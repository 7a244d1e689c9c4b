// ===============================
// src/tracker.rs (position lifecycle)
// ===============================
//
// Polls the venue on a fixed period for every tracked position. A remote
// size of zero (or a missing position) means the bracket or a manual close
// took it out; we classify against the stored TP/SL, realize PnL off the
// current mark, and hand the trade to analytics. The tracker never stops.
//
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap as HashMap;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::domain::{ClosedTrade, CloseKind, Event, Side, TrackedPosition};
use crate::exchange::Exchange;
use crate::metrics::{CLOSED_TRADES, OPEN_POSITIONS};

/// Side-aware close classification against the stored bracket.
pub fn classify_close(side: Side, exit: f64, take_profit: f64, stop_loss: f64) -> CloseKind {
    match side {
        Side::Buy => {
            if exit >= take_profit {
                CloseKind::TakeProfit
            } else if exit <= stop_loss {
                CloseKind::StopLoss
            } else {
                CloseKind::Manual
            }
        }
        Side::Sell => {
            if exit <= take_profit {
                CloseKind::TakeProfit
            } else if exit >= stop_loss {
                CloseKind::StopLoss
            } else {
                CloseKind::Manual
            }
        }
    }
}

pub fn realized_pnl(side: Side, entry: f64, exit: f64, size: f64) -> f64 {
    (exit - entry) * size * side.sign()
}

type Key = (String, Side);

pub async fn run(
    ex: Arc<dyn Exchange>,
    mut pos_rx: mpsc::Receiver<TrackedPosition>,
    closed_tx: mpsc::Sender<ClosedTrade>,
    rec_tx: mpsc::Sender<Event>,
    poll_interval: Duration,
) {
    let mut open: HashMap<Key, TrackedPosition> = HashMap::new();
    let mut tick = interval(poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            Some(pos) = pos_rx.recv() => {
                info!(symbol = %pos.symbol, side = pos.side.as_str(), "tracking position");
                open.insert((pos.symbol.clone(), pos.side), pos);
                OPEN_POSITIONS.set(open.len() as i64);
            }
            _ = tick.tick() => {
                poll_once(ex.as_ref(), &mut open, &closed_tx, &rec_tx).await;
                OPEN_POSITIONS.set(open.len() as i64);
            }
        }
    }
}

/// One poll pass. Iterates a snapshot of the keys so removals don't
/// disturb iteration; one symbol's query failure never blocks the rest.
pub async fn poll_once(
    ex: &dyn Exchange,
    open: &mut HashMap<Key, TrackedPosition>,
    closed_tx: &mpsc::Sender<ClosedTrade>,
    rec_tx: &mpsc::Sender<Event>,
) {
    let keys: Vec<Key> = open.keys().cloned().collect();
    for key in keys {
        let Some(pos) = open.get(&key) else { continue };

        let remote = match ex.position(&pos.symbol).await {
            Ok(r) => r,
            Err(e) => {
                warn!(symbol = %pos.symbol, ?e, "position query failed, retrying next tick");
                continue;
            }
        };
        let still_open = remote.map_or(false, |r| r.side == pos.side && r.size > 0.0);
        if still_open {
            continue;
        }

        // closure without an exit quote cannot be classified; defer a tick
        let exit_price = match ex.ticker(&pos.symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol = %pos.symbol, ?e, "exit quote failed, closure deferred");
                continue;
            }
        };

        let kind = classify_close(pos.side, exit_price, pos.take_profit, pos.stop_loss);
        let pnl = realized_pnl(pos.side, pos.entry_price, exit_price, pos.size);
        let trade = ClosedTrade {
            symbol: pos.symbol.clone(),
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price,
            size: pos.size,
            pnl,
            closed_at: Utc::now(),
            kind,
        };

        CLOSED_TRADES.with_label_values(&[kind.as_str()]).inc();
        info!(
            symbol = %trade.symbol,
            side = trade.side.as_str(),
            kind = kind.as_str(),
            exit = exit_price,
            pnl,
            "position closed"
        );
        let _ = rec_tx.try_send(Event::Closed(trade.clone()));
        if closed_tx.send(trade).await.is_err() {
            warn!("analytics channel closed");
        }
        open.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstrumentRules;
    use crate::exchange::{ExchangeError, OrderParams, PositionInfo};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[test]
    fn long_close_classification() {
        // entry 100, tp 101, sl 99.65
        assert_eq!(classify_close(Side::Buy, 101.0, 101.0, 99.65), CloseKind::TakeProfit);
        assert_eq!(classify_close(Side::Buy, 99.0, 101.0, 99.65), CloseKind::StopLoss);
        assert_eq!(classify_close(Side::Buy, 100.2, 101.0, 99.65), CloseKind::Manual);
    }

    #[test]
    fn short_close_classification_is_mirrored() {
        // entry 100, tp 99, sl 100.35
        assert_eq!(classify_close(Side::Sell, 98.9, 99.0, 100.35), CloseKind::TakeProfit);
        assert_eq!(classify_close(Side::Sell, 100.4, 99.0, 100.35), CloseKind::StopLoss);
        assert_eq!(classify_close(Side::Sell, 99.8, 99.0, 100.35), CloseKind::Manual);
    }

    #[test]
    fn pnl_signs_follow_side() {
        assert!((realized_pnl(Side::Buy, 100.0, 101.0, 2.0) - 2.0).abs() < 1e-9);
        assert!((realized_pnl(Side::Buy, 100.0, 99.0, 2.0) + 2.0).abs() < 1e-9);
        assert!((realized_pnl(Side::Sell, 100.0, 99.0, 2.0) - 2.0).abs() < 1e-9);
        assert!((realized_pnl(Side::Sell, 100.0, 101.0, 2.0) + 2.0).abs() < 1e-9);
    }

    /// Scripted venue: pops one canned response per position query.
    struct ScriptedExchange {
        positions: Mutex<VecDeque<Result<Option<PositionInfo>, ExchangeError>>>,
        price: f64,
    }

    #[async_trait]
    impl Exchange for ScriptedExchange {
        async fn ticker(&self, _symbol: &str) -> Result<f64, ExchangeError> {
            Ok(self.price)
        }

        async fn instrument_rules(&self, _symbol: &str) -> Result<InstrumentRules, ExchangeError> {
            Ok(InstrumentRules { qty_step: 0.001, min_qty: 0.001, price_tick: 0.05 })
        }

        async fn position(&self, _symbol: &str) -> Result<Option<PositionInfo>, ExchangeError> {
            self.positions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(None))
        }

        async fn submit_order(&self, _params: &OrderParams) -> Result<(), ExchangeError> {
            Ok(())
        }
    }

    fn tracked(symbol: &str, side: Side) -> TrackedPosition {
        TrackedPosition {
            symbol: symbol.to_string(),
            side,
            entry_price: 100.0,
            take_profit: 101.0,
            stop_loss: 99.65,
            size: 2.0,
            opened_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn closed_position_becomes_a_take_profit_trade() {
        let ex = ScriptedExchange { positions: Mutex::new(VecDeque::from([Ok(None)])), price: 101.0 };
        let mut open = HashMap::new();
        open.insert(("BTCUSDT".to_string(), Side::Buy), tracked("BTCUSDT", Side::Buy));
        let (closed_tx, mut closed_rx) = mpsc::channel(4);
        let (rec_tx, _rec_rx) = mpsc::channel(4);

        poll_once(&ex, &mut open, &closed_tx, &rec_tx).await;

        let trade = closed_rx.try_recv().unwrap();
        assert_eq!(trade.kind, CloseKind::TakeProfit);
        assert!((trade.pnl - 2.0).abs() < 1e-9); // (101-100) * 2
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn still_open_position_stays_tracked() {
        let ex = ScriptedExchange {
            positions: Mutex::new(VecDeque::from([Ok(Some(PositionInfo { side: Side::Buy, size: 2.0 }))])),
            price: 100.5,
        };
        let mut open = HashMap::new();
        open.insert(("BTCUSDT".to_string(), Side::Buy), tracked("BTCUSDT", Side::Buy));
        let (closed_tx, mut closed_rx) = mpsc::channel(4);
        let (rec_tx, _rec_rx) = mpsc::channel(4);

        poll_once(&ex, &mut open, &closed_tx, &rec_tx).await;

        assert!(closed_rx.try_recv().is_err());
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn one_query_failure_does_not_block_the_tick() {
        let ex = ScriptedExchange {
            positions: Mutex::new(VecDeque::from([
                Err(ExchangeError::Transport("timeout".to_string())),
                Ok(None),
            ])),
            price: 99.0,
        };
        let mut open = HashMap::new();
        open.insert(("BTCUSDT".to_string(), Side::Buy), tracked("BTCUSDT", Side::Buy));
        open.insert(("ETHUSDT".to_string(), Side::Buy), tracked("ETHUSDT", Side::Buy));
        let (closed_tx, mut closed_rx) = mpsc::channel(4);
        let (rec_tx, _rec_rx) = mpsc::channel(4);

        poll_once(&ex, &mut open, &closed_tx, &rec_tx).await;

        // exactly one closed (stop loss at 99), one deferred by the failure
        let trade = closed_rx.try_recv().unwrap();
        assert_eq!(trade.kind, CloseKind::StopLoss);
        assert!(closed_rx.try_recv().is_err());
        assert_eq!(open.len(), 1);
    }
}
