// ===============================
// src/feed.rs
// ===============================
//
// Liquidation feed adapters:
// - run_mock  : random burst generator so the pipeline runs offline
// - run_bybit : Bybit v5 public WS, allLiquidation.<SYMBOL> topics
//
// Reconnect policy is a fixed delay with no backoff growth and no attempt
// bound; the subscribe frame is re-sent on every (re)connect.
//
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};
use url::Url;

use crate::bybit::WsLiqEnvelope;
use crate::domain::{now_ms, Event, LiquidationEvent, LiquidationObs, Side};
use crate::metrics::{LIQ_EVENTS, LIQ_EVENTS_BY, WS_RECONNECTS};

/// Mock generator: bursts of 1-4 same-direction liquidations every few
/// seconds, notional spread around the default 1k threshold.
pub async fn run_mock(
    evt_tx: mpsc::Sender<LiquidationEvent>,
    rec_tx: mpsc::Sender<Event>,
    symbols: Vec<String>,
) {
    let mut px: Vec<f64> = symbols.iter().map(|_| 100.0).collect();
    loop {
        // don't hold ThreadRng across .await
        let (idx, side, burst, pause_ms) = {
            let mut rng = rand::thread_rng();
            let idx = rng.gen_range(0..symbols.len());
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            (idx, side, rng.gen_range(1..=4usize), rng.gen_range(2_000..=6_000u64))
        };
        for _ in 0..burst {
            let (price, volume) = {
                let mut rng = rand::thread_rng();
                px[idx] = (px[idx] * (1.0 + rng.gen_range(-0.004..=0.004))).max(1.0);
                (px[idx], rng.gen_range(2.0..=200.0))
            };
            let obs = LiquidationObs { symbol: symbols[idx].clone(), side, price, volume };
            publish(&evt_tx, &rec_tx, now_ms(), vec![obs]).await;
            sleep(Duration::from_millis(300)).await;
        }
        sleep(Duration::from_millis(pause_ms)).await;
    }
}

/// Bybit v5 public stream adapter (read-only).
///
/// - `ws_base`: wss://stream.bybit.com/v5/public/linear (or testnet)
/// - subscribes allLiquidation.<SYMBOL> for the fixed symbol list
/// - application-level ping every 20s, Bybit drops quiet connections
pub async fn run_bybit(
    evt_tx: mpsc::Sender<LiquidationEvent>,
    rec_tx: mpsc::Sender<Event>,
    symbols: Vec<String>,
    ws_base: String,
    reconnect_delay: Duration,
) {
    let topics: Vec<String> = symbols.iter().map(|s| format!("allLiquidation.{s}")).collect();
    let sub_frame = serde_json::json!({ "op": "subscribe", "args": topics }).to_string();

    loop {
        let url = match Url::parse(&ws_base) {
            Ok(u) => u,
            Err(e) => {
                error!(?e, %ws_base, "bad ws url");
                return;
            }
        };

        info!(%ws_base, "connecting liquidation stream");
        match connect_async(url).await {
            Ok((mut ws, _resp)) => {
                // fresh connection needs a fresh subscribe
                if let Err(e) = ws.send(Message::Text(sub_frame.clone())).await {
                    error!(?e, "subscribe send failed");
                } else {
                    info!(?symbols, "subscribed allLiquidation");
                    let mut ping = interval(Duration::from_secs(20));
                    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

                    loop {
                        tokio::select! {
                            _ = ping.tick() => {
                                if ws.send(Message::Text(r#"{"op":"ping"}"#.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            frame = ws.next() => match frame {
                                Some(Ok(m)) if m.is_text() => {
                                    let txt = match m.into_text() {
                                        Ok(t) => t,
                                        Err(e) => {
                                            warn!(?e, "failed to read text frame");
                                            continue;
                                        }
                                    };
                                    if let Some((ts, obs)) = parse_push(&txt) {
                                        publish(&evt_tx, &rec_tx, ts, obs).await;
                                    }
                                }
                                Some(Ok(_)) => {
                                    // ignore non-text frames
                                }
                                Some(Err(e)) => {
                                    error!(?e, "ws read error");
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                }
                warn!("liquidation stream disconnected, will reconnect…");
            }
            Err(e) => {
                error!(?e, "connect failed");
            }
        }

        // Fixed delay: availability over backoff discipline.
        WS_RECONNECTS.inc();
        sleep(reconnect_delay).await;
    }
}

fn parse_push(txt: &str) -> Option<(i64, Vec<LiquidationObs>)> {
    let env: WsLiqEnvelope = serde_json::from_str(txt).ok()?;
    if !env.topic.as_deref().unwrap_or("").starts_with("allLiquidation.") {
        return None; // pong / subscribe ack / other topics
    }
    let items = env.data?;
    let ts = env.ts.or_else(|| items.first().map(|i| i.ts_ms)).unwrap_or_else(now_ms);
    let obs: Vec<LiquidationObs> = items
        .into_iter()
        .filter_map(|i| {
            let side = Side::from_venue(&i.side)?;
            let price = i.price.parse::<f64>().ok()?;
            let volume = i.volume.parse::<f64>().ok()?;
            (price > 0.0 && volume > 0.0).then(|| LiquidationObs {
                symbol: i.symbol,
                side,
                price,
                volume,
            })
        })
        .collect();
    (!obs.is_empty()).then_some((ts, obs))
}

async fn publish(
    evt_tx: &mpsc::Sender<LiquidationEvent>,
    rec_tx: &mpsc::Sender<Event>,
    ts_ms: i64,
    observations: Vec<LiquidationObs>,
) {
    for o in &observations {
        LIQ_EVENTS.inc();
        LIQ_EVENTS_BY.with_label_values(&[&o.symbol, o.side.as_str()]).inc();
        let _ = rec_tx.try_send(Event::Liq(o.clone()));
    }
    if let Err(e) = evt_tx.send(LiquidationEvent { ts_ms, observations }).await {
        error!(?e, "event send failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_push_maps_batch() {
        let raw = r#"{"topic":"allLiquidation.ETHUSDT","ts":1739502302929,
            "data":[{"T":1739502302929,"s":"ETHUSDT","S":"Buy","v":"3.5","p":"2000"},
                    {"T":1739502302930,"s":"ETHUSDT","S":"Buy","v":"1.0","p":"2001"}]}"#;
        let (ts, obs) = parse_push(raw).unwrap();
        assert_eq!(ts, 1739502302929);
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].side, Side::Buy);
        assert!((obs[0].notional() - 7000.0).abs() < 1e-9);
    }

    #[test]
    fn parse_push_drops_control_and_garbage() {
        assert!(parse_push(r#"{"success":true,"op":"pong"}"#).is_none());
        assert!(parse_push("not json").is_none());
        let raw = r#"{"topic":"allLiquidation.X","ts":1,"data":[{"T":1,"s":"X","S":"??","v":"1","p":"1"}]}"#;
        assert!(parse_push(raw).is_none());
    }
}
