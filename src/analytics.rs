// ===============================
// src/analytics.rs (daily summary)
// ===============================
use chrono::{NaiveDate, Utc};
use tokio::sync::mpsc;
use tracing::info;

use crate::domain::ClosedTrade;
use crate::metrics::PNL_TOTAL;

/// Rolling stats for the day the process started. In-memory only; lost on
/// restart, and deliberately not rolled over at midnight.
#[derive(Debug, Clone)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_orders: u64,
    pub profitable: u64,
    pub losses: u64,
    pub total_pnl: f64,
    pub positions: Vec<ClosedTrade>,
}

impl DailySummary {
    pub fn new(date: NaiveDate) -> Self {
        Self { date, total_orders: 0, profitable: 0, losses: 0, total_pnl: 0.0, positions: Vec::new() }
    }

    /// Breakeven counts as profitable.
    pub fn record(&mut self, trade: ClosedTrade) {
        self.total_orders += 1;
        if trade.pnl >= 0.0 {
            self.profitable += 1;
        } else {
            self.losses += 1;
        }
        self.total_pnl += trade.pnl;
        self.positions.push(trade);
    }

    pub fn win_rate_pct(&self) -> f64 {
        if self.total_orders == 0 {
            0.0
        } else {
            self.profitable as f64 / self.total_orders as f64 * 100.0
        }
    }

    pub fn report(&self) -> String {
        format!(
            "{} | orders {} | wins {} | losses {} | win rate {:.2}% | pnl {:+.2} USD",
            self.date, self.total_orders, self.profitable, self.losses,
            self.win_rate_pct(), self.total_pnl
        )
    }
}

pub async fn run(mut closed_rx: mpsc::Receiver<ClosedTrade>, note_tx: mpsc::Sender<String>) {
    let mut summary = DailySummary::new(Utc::now().date_naive());

    while let Some(trade) = closed_rx.recv().await {
        let outcome = format!(
            "closed {} {} ({}) exit {:.4}, pnl {:+.2} USD",
            trade.side.as_str(), trade.symbol, trade.kind.as_str(), trade.exit_price, trade.pnl
        );
        summary.record(trade);
        PNL_TOTAL.set(summary.total_pnl);
        info!(total = summary.total_orders, pnl = summary.total_pnl, "summary updated");
        let _ = note_tx.try_send(format!("{outcome}\n{}", summary.report()));
    }
}
