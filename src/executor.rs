// ===============================
// src/executor.rs (order execution gate)
// ===============================
//
// Takes contrarian order requests from the detector, refuses same-side
// stacking, sizes the order off the live quote, validates the TP/SL
// bracket, submits, and registers the tracked position. One submission
// per successful call, one notification per terminal outcome, never an
// automatic retry.
//
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Tuning;
use crate::domain::{Event, OrderRequest, TrackedPosition};
use crate::exchange::{Exchange, ExchangeError, OrderParams};
use crate::metrics::ORDERS;
use crate::sizer::{self, SizerError};

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Sizer(#[from] SizerError),
}

#[derive(Debug)]
pub enum ExecOutcome {
    Submitted(TrackedPosition),
    /// Same-side position already open: benign, no order sent.
    Skipped,
}

pub async fn execute(
    ex: &dyn Exchange,
    tuning: &Tuning,
    req: &OrderRequest,
) -> Result<ExecOutcome, GateError> {
    // 1) conflict check: one position per symbol+side
    if let Some(p) = ex.position(&req.symbol).await? {
        if p.side == req.side && p.size > 0.0 {
            return Ok(ExecOutcome::Skipped);
        }
    }

    // 2) quote + instrument rules
    let price = ex.ticker(&req.symbol).await?;
    let rules = ex.instrument_rules(&req.symbol).await?;

    // 3) sizing and bracket; an inverted bracket aborts before submission
    let qty = sizer::order_qty(tuning.order_notional_usd, price, &rules);
    let (take_profit, stop_loss) =
        sizer::protection_levels(req.side, price, tuning.tp_frac, tuning.sl_frac, rules.price_tick)?;

    // 4) submit
    let params = OrderParams {
        symbol: req.symbol.clone(),
        side: req.side,
        qty,
        take_profit,
        stop_loss,
        rules,
    };
    ex.submit_order(&params).await?;

    // 5) register with the tracker; entry is the quote at submission time
    Ok(ExecOutcome::Submitted(TrackedPosition {
        symbol: req.symbol.clone(),
        side: req.side,
        entry_price: price,
        take_profit,
        stop_loss,
        size: qty,
        opened_at: Utc::now(),
    }))
}

pub async fn run(
    ex: Arc<dyn Exchange>,
    mut req_rx: mpsc::Receiver<OrderRequest>,
    pos_tx: mpsc::Sender<TrackedPosition>,
    note_tx: mpsc::Sender<String>,
    rec_tx: mpsc::Sender<Event>,
    tuning: Tuning,
) {
    while let Some(req) = req_rx.recv().await {
        match execute(ex.as_ref(), &tuning, &req).await {
            Ok(ExecOutcome::Submitted(pos)) => {
                ORDERS.with_label_values(&["submitted"]).inc();
                info!(
                    symbol = %pos.symbol,
                    side = pos.side.as_str(),
                    qty = pos.size,
                    entry = pos.entry_price,
                    tp = pos.take_profit,
                    sl = pos.stop_loss,
                    "order submitted"
                );
                let _ = rec_tx.try_send(Event::Submitted(pos.clone()));
                let _ = note_tx.try_send(format!(
                    "opened {} {} qty {:.6} @ {:.4} (tp {:.4} / sl {:.4})",
                    pos.side.as_str(), pos.symbol, pos.size, pos.entry_price,
                    pos.take_profit, pos.stop_loss
                ));
                if pos_tx.send(pos).await.is_err() {
                    warn!("tracker channel closed");
                }
            }
            Ok(ExecOutcome::Skipped) => {
                ORDERS.with_label_values(&["skipped"]).inc();
                info!(symbol = %req.symbol, side = req.side.as_str(), "skipped: conflicting position");
                let _ = note_tx.try_send(format!(
                    "skipped {} {}: conflicting position already open",
                    req.side.as_str(), req.symbol
                ));
            }
            Err(e) => {
                let outcome = match &e {
                    GateError::Exchange(ExchangeError::OrderRejected(_)) => "rejected",
                    _ => "failed",
                };
                ORDERS.with_label_values(&[outcome]).inc();
                warn!(symbol = %req.symbol, side = req.side.as_str(), ?e, "order not placed");
                let _ = note_tx.try_send(format!(
                    "order {} {} not placed: {}",
                    req.side.as_str(), req.symbol, e
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstrumentRules, Side};
    use crate::exchange::PositionInfo;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct StubExchange {
        position: Option<PositionInfo>,
        price: Result<f64, ()>,
        rules: InstrumentRules,
        reject: Option<String>,
        submitted: Mutex<Vec<OrderParams>>,
    }

    impl StubExchange {
        fn flat(price: f64) -> Self {
            Self {
                position: None,
                price: Ok(price),
                rules: InstrumentRules { qty_step: 0.001, min_qty: 0.001, price_tick: 0.05 },
                reject: None,
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn submissions(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Exchange for StubExchange {
        async fn ticker(&self, symbol: &str) -> Result<f64, ExchangeError> {
            self.price
                .map_err(|_| ExchangeError::PriceUnavailable(symbol.to_string()))
        }

        async fn instrument_rules(&self, _symbol: &str) -> Result<InstrumentRules, ExchangeError> {
            Ok(self.rules)
        }

        async fn position(&self, _symbol: &str) -> Result<Option<PositionInfo>, ExchangeError> {
            Ok(self.position)
        }

        async fn submit_order(&self, params: &OrderParams) -> Result<(), ExchangeError> {
            if let Some(reason) = &self.reject {
                return Err(ExchangeError::OrderRejected(reason.clone()));
            }
            self.submitted.lock().unwrap().push(params.clone());
            Ok(())
        }
    }

    fn tuning() -> Tuning {
        Tuning {
            min_liq_notional: 1_000.0,
            big_liq_notional: None,
            quiescence: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(30),
            poll_interval: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(5),
            order_notional_usd: 100.0,
            tp_frac: 0.01,
            sl_frac: 0.0035,
        }
    }

    fn req(side: Side) -> OrderRequest {
        OrderRequest { symbol: "BTCUSDT".to_string(), side }
    }

    #[tokio::test]
    async fn same_side_position_skips_without_submitting() {
        let mut ex = StubExchange::flat(100.0);
        ex.position = Some(PositionInfo { side: Side::Buy, size: 0.5 });
        let out = execute(&ex, &tuning(), &req(Side::Buy)).await.unwrap();
        assert!(matches!(out, ExecOutcome::Skipped));
        assert_eq!(ex.submissions(), 0);
    }

    #[tokio::test]
    async fn opposite_side_position_does_not_block() {
        let mut ex = StubExchange::flat(100.0);
        ex.position = Some(PositionInfo { side: Side::Sell, size: 0.5 });
        let out = execute(&ex, &tuning(), &req(Side::Buy)).await.unwrap();
        assert!(matches!(out, ExecOutcome::Submitted(_)));
        assert_eq!(ex.submissions(), 1);
    }

    #[tokio::test]
    async fn submission_registers_entry_at_quote() {
        let ex = StubExchange::flat(100.0);
        let out = execute(&ex, &tuning(), &req(Side::Buy)).await.unwrap();
        let pos = match out {
            ExecOutcome::Submitted(p) => p,
            other => panic!("expected submission, got {other:?}"),
        };
        assert_eq!(pos.entry_price, 100.0);
        assert!((pos.size - 1.0).abs() < 1e-9); // 100 USD / 100.0
        assert!((pos.take_profit - 101.0).abs() < 1e-9);
        assert!((pos.stop_loss - 99.65).abs() < 1e-9);

        let sub = ex.submitted.lock().unwrap();
        assert_eq!(sub.len(), 1);
        assert!((sub[0].qty - pos.size).abs() < 1e-9);
    }

    #[tokio::test]
    async fn venue_rejection_is_an_error_not_a_position() {
        let mut ex = StubExchange::flat(100.0);
        ex.reject = Some("110007 insufficient balance".to_string());
        let err = execute(&ex, &tuning(), &req(Side::Buy)).await.unwrap_err();
        assert!(matches!(err, GateError::Exchange(ExchangeError::OrderRejected(_))));
    }

    #[tokio::test]
    async fn missing_quote_aborts() {
        let mut ex = StubExchange::flat(100.0);
        ex.price = Err(());
        let err = execute(&ex, &tuning(), &req(Side::Sell)).await.unwrap_err();
        assert!(matches!(err, GateError::Exchange(ExchangeError::PriceUnavailable(_))));
        assert_eq!(ex.submissions(), 0);
    }

    #[tokio::test]
    async fn collapsed_bracket_aborts_before_submission() {
        let mut ex = StubExchange::flat(100.0);
        // a 1000-point tick rounds both protection levels onto zero
        ex.rules.price_tick = 1_000.0;
        let err = execute(&ex, &tuning(), &req(Side::Buy)).await.unwrap_err();
        assert!(matches!(err, GateError::Sizer(SizerError::InvertedBracket { .. })));
        assert_eq!(ex.submissions(), 0);
    }
}
