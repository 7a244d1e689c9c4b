// ===============================
// src/sizer.rs
// ===============================
//
// Converts a USD notional + quote + instrument rules into a valid order
// quantity, and entry +/- percent offsets into tick-aligned TP/SL levels.
// Pure math, no venue calls; the gate feeds it live quotes.
//
use thiserror::Error;

use crate::domain::{InstrumentRules, Side};

#[derive(Debug, Error)]
pub enum SizerError {
    #[error("inverted bracket for {side:?}: tp={tp} entry={entry} sl={sl}")]
    InvertedBracket { side: Side, tp: f64, entry: f64, sl: f64 },
}

/// Round `qty` to the nearest multiple of `step`.
pub fn round_to_step(qty: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return qty;
    }
    (qty / step).round() * step
}

/// Round `price` to the nearest tick: round(price/tick) * tick.
pub fn adjust_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    (price / tick).round() * tick
}

/// usd_notional / price, rounded to the lot step, floored at min_qty.
pub fn order_qty(usd_notional: f64, price: f64, rules: &InstrumentRules) -> f64 {
    let raw = usd_notional / price;
    round_to_step(raw, rules.qty_step).max(rules.min_qty)
}

/// TP/SL levels around `entry`, tick-adjusted, mirrored for shorts.
/// The post-adjustment bracket must not be inverted; a violation means the
/// configured percentages collapse inside one tick and submission aborts.
pub fn protection_levels(
    side: Side,
    entry: f64,
    tp_frac: f64,
    sl_frac: f64,
    tick: f64,
) -> Result<(f64, f64), SizerError> {
    let (tp_raw, sl_raw) = match side {
        Side::Buy => (entry * (1.0 + tp_frac), entry * (1.0 - sl_frac)),
        Side::Sell => (entry * (1.0 - tp_frac), entry * (1.0 + sl_frac)),
    };
    let tp = adjust_to_tick(tp_raw, tick);
    let sl = adjust_to_tick(sl_raw, tick);

    let ok = match side {
        Side::Buy => tp > entry && entry > sl,
        Side::Sell => tp < entry && entry < sl,
    };
    if !ok {
        return Err(SizerError::InvertedBracket { side, tp, entry, sl });
    }
    Ok((tp, sl))
}
