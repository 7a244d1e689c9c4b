// ===============================
// src/main.rs
// ===============================
/*
=============================================================================
Project : cascade_bot_rust — contrarian liquidation-cascade engine in Rust
Module  : main.rs
Version : 0.3.0
License : MIT (see LICENSE)

Summary : Streams public liquidation events (mock/Bybit v5), debounces
          same-direction cascades per symbol, opens contrarian market
          orders with TP/SL brackets, polls positions until close,
          aggregates daily PnL stats, exposes Prometheus metrics, and
          records JSONL events.
=============================================================================
*/
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::info;

use cascade_bot_rust::bybit::BybitClient;
use cascade_bot_rust::config::{self, MarketMode};
use cascade_bot_rust::domain::{ClosedTrade, Event, LiquidationEvent, OrderRequest, TrackedPosition};
use cascade_bot_rust::exchange::Exchange;
use cascade_bot_rust::paper::PaperExchange;
use cascade_bot_rust::{analytics, detector, executor, feed, metrics, notify, recorder, tracker};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config & tuning ----
    let (args, tuning) = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        feed_mode = %args.feed_mode.as_str(),
        venue_mode = %args.venue_mode.as_str(),
        symbols = ?args.symbols,
        min_liq_notional = tuning.min_liq_notional,
        quiescence_secs = tuning.quiescence.as_secs(),
        poll_secs = tuning.poll_interval.as_secs(),
        order_notional_usd = tuning.order_notional_usd,
        bybit_ws = %args.bybit_ws_url,
        bybit_rest = %args.bybit_rest_url,
        "startup config"
    );

    metrics::CONFIG_FEED_MODE
        .with_label_values(&[args.feed_mode.as_str()])
        .set(1);
    metrics::CONFIG_VENUE_MODE
        .with_label_values(&[args.venue_mode.as_str()])
        .set(1);
    for s in &args.symbols {
        metrics::CONFIG_SYMBOL.with_label_values(&[s]).set(1);
    }

    // ---- Buses ----
    let (evt_tx, evt_rx) = mpsc::channel::<LiquidationEvent>(4096);
    let (ord_tx, ord_rx) = mpsc::channel::<OrderRequest>(256);
    let (pos_tx, pos_rx) = mpsc::channel::<TrackedPosition>(256);
    let (closed_tx, closed_rx) = mpsc::channel::<ClosedTrade>(256);
    let (note_tx, note_rx) = mpsc::channel::<String>(1024);
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);

    // ---- Recorder (optional) ----
    if let Some(path) = args.record_file.clone() {
        tokio::spawn(recorder::run(rec_rx, path));
    }

    // ---- Notifier ----
    tokio::spawn(notify::run(
        note_rx,
        notify::NotifyCfg {
            webhook_url: args.notify_webhook_url.clone(),
            recipient: args.notify_recipient.clone(),
        },
    ));

    // ---- FEED (liquidation stream) ----
    match args.feed_mode {
        MarketMode::Mock => {
            tokio::spawn(feed::run_mock(evt_tx.clone(), rec_tx.clone(), args.symbols.clone()));
        }
        MarketMode::BybitTestnet | MarketMode::BybitMainnet => {
            tokio::spawn(feed::run_bybit(
                evt_tx.clone(),
                rec_tx.clone(),
                args.symbols.clone(),
                args.bybit_ws_url.clone(),
                tuning.reconnect_delay,
            ));
        }
    }

    // ---- Venue ----
    let ex: Arc<dyn Exchange> = match args.venue_mode {
        MarketMode::Mock => Arc::new(PaperExchange::default()),
        MarketMode::BybitTestnet | MarketMode::BybitMainnet => {
            Arc::new(BybitClient::from_env(args.bybit_rest_url.clone()))
        }
    };

    // ---- Detector -> Gate -> Tracker -> Analytics ----
    tokio::spawn(detector::run(evt_rx, ord_tx, note_tx.clone(), tuning.clone()));
    tokio::spawn(executor::run(
        ex.clone(),
        ord_rx,
        pos_tx,
        note_tx.clone(),
        rec_tx.clone(),
        tuning.clone(),
    ));
    tokio::spawn(tracker::run(
        ex.clone(),
        pos_rx,
        closed_tx,
        rec_tx.clone(),
        tuning.poll_interval,
    ));
    tokio::spawn(analytics::run(closed_rx, note_tx.clone()));

    // ---- Heartbeat ----
    loop {
        sleep(Duration::from_secs(60)).await;
        info!(
            liq_events = metrics::LIQ_EVENTS.get(),
            open_positions = metrics::OPEN_POSITIONS.get(),
            "heartbeat"
        );
    }
}
