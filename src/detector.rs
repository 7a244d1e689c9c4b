// ===============================
// src/detector.rs (cascade state machine)
// ===============================
//
// Per (symbol, side) debounce: a qualifying liquidation arms a countdown,
// every further qualifying one restarts it, and the decision fires only
// once the cascade stalls for the full quiescence window. All state lives
// in one actor task; timers are spawned sleeps that message back in.
//
// DetectorState is pure and driven by an explicit now_ms so the window
// logic tests against a logical clock.
//
use ahash::AHashMap as HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Tuning;
use crate::domain::{now_ms, LiquidationEvent, OrderRequest, Side};
use crate::metrics::{CACHE_SYMBOLS, CASCADES_ARMED, CASCADES_FIRED};

#[derive(Debug, Default, Clone, Copy)]
struct CacheEntry {
    last_buy_ms: Option<i64>,
    last_sell_ms: Option<i64>,
}

impl CacheEntry {
    fn slot(&self, side: Side) -> Option<i64> {
        match side {
            Side::Buy => self.last_buy_ms,
            Side::Sell => self.last_sell_ms,
        }
    }

    fn slot_mut(&mut self, side: Side) -> &mut Option<i64> {
        match side {
            Side::Buy => &mut self.last_buy_ms,
            Side::Sell => &mut self.last_sell_ms,
        }
    }

    fn stale(&self, now_ms: i64, ttl_ms: i64) -> bool {
        let side_stale = |s: Option<i64>| s.map_or(true, |t| now_ms - t >= ttl_ms);
        side_stale(self.last_buy_ms) && side_stale(self.last_sell_ms)
    }
}

#[derive(Debug, PartialEq)]
pub enum Observed {
    /// Notional below threshold: no transition, cache untouched.
    Ignored,
    /// Armed (or re-armed): restart the countdown with this baseline.
    Armed { baseline_ms: i64 },
}

pub struct DetectorState {
    min_notional: f64,
    big_notional: Option<f64>,
    ttl_ms: i64,
    cache: HashMap<String, CacheEntry>,
}

impl DetectorState {
    pub fn new(min_notional: f64, big_notional: Option<f64>, ttl_ms: i64) -> Self {
        Self { min_notional, big_notional, ttl_ms, cache: HashMap::new() }
    }

    /// Record a liquidation observation. Timestamps per side are
    /// monotonically non-decreasing even if the feed delivers out of order.
    pub fn observe(&mut self, symbol: &str, side: Side, notional: f64, now_ms: i64) -> Observed {
        if notional < self.min_notional {
            return Observed::Ignored;
        }
        let entry = self.cache.entry(symbol.to_string()).or_default();
        let slot = entry.slot_mut(side);
        let seen = slot.map_or(now_ms, |prev| prev.max(now_ms));
        *slot = Some(seen);
        Observed::Armed { baseline_ms: seen }
    }

    pub fn is_big(&self, notional: f64) -> bool {
        self.big_notional.map_or(false, |t| notional >= t)
    }

    /// True when no newer qualifying observation superseded `baseline_ms`.
    /// The elapsed countdown must re-read this, not its own capture.
    pub fn is_current(&self, symbol: &str, side: Side, baseline_ms: i64) -> bool {
        self.cache
            .get(symbol)
            .and_then(|e| e.slot(side))
            .map_or(false, |seen| seen == baseline_ms)
    }

    /// Evict symbols where both sides have been quiet for the TTL.
    pub fn sweep(&mut self, now_ms: i64) -> usize {
        let before = self.cache.len();
        let ttl = self.ttl_ms;
        self.cache.retain(|_, e| !e.stale(now_ms, ttl));
        before - self.cache.len()
    }

    pub fn symbols(&self) -> usize {
        self.cache.len()
    }
}

struct Fired {
    symbol: String,
    side: Side,
    baseline_ms: i64,
    generation: u64,
}

/// Detector actor: owns the cache and the live countdowns, one per key.
pub async fn run(
    mut evt_rx: mpsc::Receiver<LiquidationEvent>,
    ord_tx: mpsc::Sender<OrderRequest>,
    note_tx: mpsc::Sender<String>,
    tuning: Tuning,
) {
    let mut st = DetectorState::new(
        tuning.min_liq_notional,
        tuning.big_liq_notional,
        tuning.cache_ttl.as_millis() as i64,
    );
    // generation guards against a just-aborted timer whose message already
    // landed in the queue; only the newest countdown per key may fire
    let mut timers: HashMap<(String, Side), (u64, JoinHandle<()>)> = HashMap::new();
    let mut generation: u64 = 0;
    let (fire_tx, mut fire_rx) = mpsc::channel::<Fired>(256);

    let mut sweep = interval(Duration::from_secs(5));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            Some(ev) = evt_rx.recv() => {
                for obs in &ev.observations {
                    let notional = obs.notional();
                    if st.is_big(notional) {
                        let _ = note_tx.try_send(format!(
                            "large liquidation: {} {} {:.0} USD @ {:.4}",
                            obs.symbol, obs.side.as_str(), notional, obs.price
                        ));
                    }
                    match st.observe(&obs.symbol, obs.side, notional, now_ms()) {
                        Observed::Ignored => {}
                        Observed::Armed { baseline_ms } => {
                            CASCADES_ARMED
                                .with_label_values(&[&obs.symbol, obs.side.as_str()])
                                .inc();
                            generation += 1;
                            let handle = {
                                let tx = fire_tx.clone();
                                let symbol = obs.symbol.clone();
                                let side = obs.side;
                                let quiescence = tuning.quiescence;
                                let armed_gen = generation;
                                tokio::spawn(async move {
                                    sleep(quiescence).await;
                                    let _ = tx
                                        .send(Fired { symbol, side, baseline_ms, generation: armed_gen })
                                        .await;
                                })
                            };
                            let key = (obs.symbol.clone(), obs.side);
                            if let Some((_, old)) = timers.insert(key, (generation, handle)) {
                                old.abort();
                            }
                            debug!(symbol = %obs.symbol, side = ?obs.side, notional, "cascade countdown armed");
                        }
                    }
                }
            }
            Some(f) = fire_rx.recv() => {
                let key = (f.symbol.clone(), f.side);
                let live = timers.get(&key).map_or(false, |(g, _)| *g == f.generation);
                if !live {
                    continue; // a newer countdown replaced this one
                }
                timers.remove(&key);
                // Re-read the cache: a reset may have slipped in between this
                // countdown's capture and its firing.
                if st.is_current(&f.symbol, f.side, f.baseline_ms) {
                    CASCADES_FIRED
                        .with_label_values(&[&f.symbol, f.side.as_str()])
                        .inc();
                    info!(symbol = %f.symbol, cascade = ?f.side, "cascade exhausted, requesting contrarian order");
                    let req = OrderRequest { symbol: f.symbol, side: f.side.flip() };
                    if ord_tx.send(req).await.is_err() {
                        warn!("order channel closed");
                    }
                }
            }
            _ = sweep.tick() => {
                let evicted = st.sweep(now_ms());
                if evicted > 0 {
                    debug!(evicted, "liquidation cache swept");
                }
                CACHE_SYMBOLS.set(st.symbols() as i64);
            }
        }
    }
}
