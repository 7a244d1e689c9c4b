//! End-to-end cascade flow: liquidation burst -> detector debounce ->
//! execution gate -> tracked position, against a recording stub venue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::sleep;

use cascade_bot_rust::config::Tuning;
use cascade_bot_rust::domain::{
    now_ms, InstrumentRules, LiquidationEvent, LiquidationObs, OrderRequest, Side, TrackedPosition,
};
use cascade_bot_rust::exchange::{Exchange, ExchangeError, OrderParams, PositionInfo};
use cascade_bot_rust::{detector, executor};

struct RecordingExchange {
    price: f64,
    submitted: Mutex<Vec<OrderParams>>,
}

impl RecordingExchange {
    fn new(price: f64) -> Self {
        Self { price, submitted: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl Exchange for RecordingExchange {
    async fn ticker(&self, _symbol: &str) -> Result<f64, ExchangeError> {
        Ok(self.price)
    }

    async fn instrument_rules(&self, _symbol: &str) -> Result<InstrumentRules, ExchangeError> {
        Ok(InstrumentRules { qty_step: 0.001, min_qty: 0.001, price_tick: 0.05 })
    }

    async fn position(&self, _symbol: &str) -> Result<Option<PositionInfo>, ExchangeError> {
        Ok(None)
    }

    async fn submit_order(&self, params: &OrderParams) -> Result<(), ExchangeError> {
        self.submitted.lock().unwrap().push(params.clone());
        Ok(())
    }
}

fn fast_tuning() -> Tuning {
    Tuning {
        min_liq_notional: 1_000.0,
        big_liq_notional: None,
        quiescence: Duration::from_millis(250),
        cache_ttl: Duration::from_secs(30),
        poll_interval: Duration::from_secs(15),
        reconnect_delay: Duration::from_secs(5),
        order_notional_usd: 100.0,
        tp_frac: 0.01,
        sl_frac: 0.0035,
    }
}

fn sell_obs(notional: f64, price: f64) -> LiquidationObs {
    LiquidationObs { symbol: "BTCUSDT".to_string(), side: Side::Sell, price, volume: notional / price }
}

async fn send_one(evt_tx: &mpsc::Sender<LiquidationEvent>, obs: LiquidationObs) {
    evt_tx
        .send(LiquidationEvent { ts_ms: now_ms(), observations: vec![obs] })
        .await
        .unwrap();
}

#[tokio::test]
async fn sell_cascade_opens_exactly_one_contrarian_buy() {
    let tuning = fast_tuning();
    let ex = Arc::new(RecordingExchange::new(100.0));

    let (evt_tx, evt_rx) = mpsc::channel::<LiquidationEvent>(64);
    let (ord_tx, ord_rx) = mpsc::channel::<OrderRequest>(16);
    let (pos_tx, mut pos_rx) = mpsc::channel::<TrackedPosition>(16);
    let (note_tx, _note_rx) = mpsc::channel::<String>(64);
    let (rec_tx, _rec_rx) = mpsc::channel(64);

    tokio::spawn(detector::run(evt_rx, ord_tx, note_tx.clone(), tuning.clone()));
    tokio::spawn(executor::run(
        ex.clone(),
        ord_rx,
        pos_tx,
        note_tx,
        rec_tx,
        tuning.clone(),
    ));

    // three qualifying sell liquidations inside one quiescence window
    for notional in [2_000.0, 3_000.0, 1_500.0] {
        send_one(&evt_tx, sell_obs(notional, 100.0)).await;
        sleep(Duration::from_millis(40)).await;
    }

    // the cascade keeps refreshing the countdown: nothing may fire yet
    sleep(Duration::from_millis(100)).await;
    assert_eq!(ex.submitted.lock().unwrap().len(), 0, "fired before quiescence elapsed");

    // well past the window after the last event: exactly one Buy
    sleep(Duration::from_millis(700)).await;
    {
        let subs = ex.submitted.lock().unwrap();
        assert_eq!(subs.len(), 1, "expected exactly one contrarian order");
        assert_eq!(subs[0].side, Side::Buy);
        assert_eq!(subs[0].symbol, "BTCUSDT");
        // sized at the configured USD notional: 100 USD / 100.0 = 1.0
        assert!((subs[0].qty - 1.0).abs() < 1e-9);
    }

    let pos = pos_rx.recv().await.expect("tracked position registered");
    assert_eq!(pos.side, Side::Buy);
    assert_eq!(pos.entry_price, 100.0);

    // and the stalled cascade does not re-fire on its own
    sleep(Duration::from_millis(300)).await;
    assert_eq!(ex.submitted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn sub_threshold_liquidations_never_trigger() {
    let tuning = fast_tuning();
    let ex = Arc::new(RecordingExchange::new(100.0));

    let (evt_tx, evt_rx) = mpsc::channel::<LiquidationEvent>(64);
    let (ord_tx, ord_rx) = mpsc::channel::<OrderRequest>(16);
    let (pos_tx, _pos_rx) = mpsc::channel::<TrackedPosition>(16);
    let (note_tx, _note_rx) = mpsc::channel::<String>(64);
    let (rec_tx, _rec_rx) = mpsc::channel(64);

    tokio::spawn(detector::run(evt_rx, ord_tx, note_tx.clone(), tuning.clone()));
    tokio::spawn(executor::run(ex.clone(), ord_rx, pos_tx, note_tx, rec_tx, tuning));

    for _ in 0..3 {
        send_one(&evt_tx, sell_obs(999.0, 100.0)).await;
        sleep(Duration::from_millis(30)).await;
    }

    sleep(Duration::from_millis(600)).await;
    assert!(ex.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn independent_sides_fire_independently() {
    let tuning = fast_tuning();
    let ex = Arc::new(RecordingExchange::new(100.0));

    let (evt_tx, evt_rx) = mpsc::channel::<LiquidationEvent>(64);
    let (ord_tx, ord_rx) = mpsc::channel::<OrderRequest>(16);
    let (pos_tx, _pos_rx) = mpsc::channel::<TrackedPosition>(16);
    let (note_tx, _note_rx) = mpsc::channel::<String>(64);
    let (rec_tx, _rec_rx) = mpsc::channel(64);

    tokio::spawn(detector::run(evt_rx, ord_tx, note_tx.clone(), tuning.clone()));
    tokio::spawn(executor::run(ex.clone(), ord_rx, pos_tx, note_tx, rec_tx, tuning));

    send_one(&evt_tx, sell_obs(2_000.0, 100.0)).await;
    send_one(
        &evt_tx,
        LiquidationObs { symbol: "BTCUSDT".to_string(), side: Side::Buy, price: 100.0, volume: 20.0 },
    )
    .await;

    sleep(Duration::from_millis(700)).await;
    let subs = ex.submitted.lock().unwrap();
    assert_eq!(subs.len(), 2);
    let mut sides: Vec<Side> = subs.iter().map(|p| p.side).collect();
    sides.sort_by_key(|s| s.as_str());
    assert_eq!(sides, vec![Side::Buy, Side::Sell]);
}
