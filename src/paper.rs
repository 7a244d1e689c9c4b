// ===============================
// src/paper.rs (mock venue)
// ===============================
//
// In-process stand-in for the real venue so the whole pipeline runs
// without network access: orders fill instantly at the random-walk quote,
// positions disappear after a short random hold so the tracker sees a
// closure within a few polls.
//
use async_trait::async_trait;
use rand::Rng;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ahash::AHashMap as HashMap;

use crate::domain::{InstrumentRules, Side};
use crate::exchange::{Exchange, ExchangeError, OrderParams, PositionInfo};

struct PaperPosition {
    side: Side,
    size: f64,
    close_at: Instant,
}

struct PaperBook {
    last_px: HashMap<String, f64>,
    positions: HashMap<String, PaperPosition>,
}

pub struct PaperExchange {
    book: Mutex<PaperBook>,
    min_hold: Duration,
    max_hold: Duration,
}

impl PaperExchange {
    pub fn new(min_hold: Duration, max_hold: Duration) -> Self {
        Self {
            book: Mutex::new(PaperBook { last_px: HashMap::new(), positions: HashMap::new() }),
            min_hold,
            max_hold,
        }
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new(Duration::from_secs(20), Duration::from_secs(60))
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn ticker(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let mut book = self.book.lock().expect("paper book lock");
        let px = book.last_px.entry(symbol.to_string()).or_insert(100.0);
        // random walk, +/-0.5% per quote, floored well above zero
        let step = rand::thread_rng().gen_range(-0.005..=0.005);
        *px = (*px * (1.0 + step)).max(1.0);
        Ok(*px)
    }

    async fn instrument_rules(&self, _symbol: &str) -> Result<InstrumentRules, ExchangeError> {
        Ok(InstrumentRules { qty_step: 0.001, min_qty: 0.001, price_tick: 0.01 })
    }

    async fn position(&self, symbol: &str) -> Result<Option<PositionInfo>, ExchangeError> {
        let mut book = self.book.lock().expect("paper book lock");
        let expired = book
            .positions
            .get(symbol)
            .map(|p| Instant::now() >= p.close_at)
            .unwrap_or(false);
        if expired {
            book.positions.remove(symbol);
        }
        Ok(book
            .positions
            .get(symbol)
            .map(|p| PositionInfo { side: p.side, size: p.size }))
    }

    async fn submit_order(&self, params: &OrderParams) -> Result<(), ExchangeError> {
        let hold = rand::thread_rng().gen_range(self.min_hold.as_millis()..=self.max_hold.as_millis());
        let mut book = self.book.lock().expect("paper book lock");
        book.positions.insert(
            params.symbol.clone(),
            PaperPosition {
                side: params.side,
                size: params.qty,
                close_at: Instant::now() + Duration::from_millis(hold as u64),
            },
        );
        Ok(())
    }
}
