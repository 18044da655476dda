use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::models::{IntentKind, Position, Side, Trade};
use crate::Result;

/// One ledger line: the fill plus running totals
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub trade: Trade,
    /// Buy = -notional, sell = +notional
    pub cash_flow: f64,
    pub realized_pnl: Option<f64>,
    pub cumulative_pnl: f64,
}

/// Append-only record of executed fills
///
/// Only written, never read back by the engine.
pub struct TradeLedger {
    entries: Vec<LedgerEntry>,
    cash_flow: f64,
    cumulative_pnl: f64,
    sink: Option<BufWriter<File>>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            cash_flow: 0.0,
            cumulative_pnl: 0.0,
            sink: None,
        }
    }

    /// Ledger that also appends every entry as a JSON line to `path`
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            sink: Some(BufWriter::new(file)),
            ..Self::new()
        })
    }

    /// Record an opening fill
    pub fn record_open(&mut self, trade: Trade) -> &LedgerEntry {
        self.push(trade, None)
    }

    /// Record a closing fill of `position`
    pub fn record_close(&mut self, trade: Trade, position: &Position) -> &LedgerEntry {
        let direction = match position.side {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        };
        let pnl = (trade.price - position.open_price) * trade.volume * direction;
        self.push(trade, Some(pnl))
    }

    /// Record a position that left the books without our own close fill
    ///
    /// Covers broker-side TP/SL hits and close-all sweeps. The broker does not
    /// report the exit, so `trade.price` is the caller's estimate.
    pub fn record_external_close(&mut self, trade: Trade, position: &Position) -> &LedgerEntry {
        tracing::info!(
            ticket = position.ticket,
            side = %position.side,
            "Ledger: booking external close at estimated price {:.5}",
            trade.price
        );
        self.record_close(trade, position)
    }

    fn push(&mut self, trade: Trade, realized_pnl: Option<f64>) -> &LedgerEntry {
        let notional = trade.price * trade.volume;
        let cash_flow = match trade.side {
            Side::Buy => -notional,
            Side::Sell => notional,
        };
        self.cash_flow += cash_flow;
        if let Some(pnl) = realized_pnl {
            self.cumulative_pnl += pnl;
        }

        let entry = LedgerEntry {
            trade,
            cash_flow,
            realized_pnl,
            cumulative_pnl: self.cumulative_pnl,
        };
        self.write_line(&entry);
        log_trade(&entry);

        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    fn write_line(&mut self, entry: &LedgerEntry) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let written = serde_json::to_string(entry)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(sink, "{}", line))
            .and_then(|_| sink.flush());
        if let Err(e) = written {
            tracing::warn!("Failed to write trade ledger line: {}", e);
        }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn trade_count(&self) -> usize {
        self.entries.len()
    }

    /// Sum of signed notionals (buy negative, sell positive)
    pub fn cash_flow(&self) -> f64 {
        self.cash_flow
    }

    pub fn cumulative_pnl(&self) -> f64 {
        self.cumulative_pnl
    }

    /// Share of closing entries with a positive realized P&L, in percent
    ///
    /// 0 when nothing has been closed yet.
    pub fn win_rate(&self) -> f64 {
        let closed: Vec<f64> = self.entries.iter().filter_map(|e| e.realized_pnl).collect();
        if closed.is_empty() {
            return 0.0;
        }
        let wins = closed.iter().filter(|pnl| **pnl > 0.0).count();
        wins as f64 / closed.len() as f64 * 100.0
    }
}

impl Default for TradeLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn log_trade(entry: &LedgerEntry) {
    let action = match entry.trade.kind {
        IntentKind::Open => "OPEN",
        IntentKind::Close => "CLOSE",
    };
    tracing::info!("{}", "=".repeat(50));
    tracing::info!(
        "{} {} {} @ {:.5} | volume {} | ticket {}",
        action,
        entry.trade.side,
        entry.trade.symbol,
        entry.trade.price,
        entry.trade.volume,
        entry.trade.ticket
    );
    if let Some(pnl) = entry.realized_pnl {
        tracing::info!("Realized P&L: {:.2} | Cumulative: {:.2}", pnl, entry.cumulative_pnl);
    }
    tracing::info!("{}", "=".repeat(50));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Read;
    use uuid::Uuid;

    fn trade(kind: IntentKind, side: Side, price: f64) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            symbol: "WIN$N".to_string(),
            kind,
            side,
            price,
            volume: 2.0,
            ticket: 11,
            timestamp: Utc::now(),
        }
    }

    fn long_position() -> Position {
        Position {
            ticket: 11,
            side: Side::Buy,
            open_price: 100.0,
            stop_loss: 97.0,
            take_profit: 105.0,
            volume: 2.0,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_cash_flow_signs() {
        let mut ledger = TradeLedger::new();
        ledger.record_open(trade(IntentKind::Open, Side::Buy, 100.0));
        assert_eq!(ledger.cash_flow(), -200.0);

        ledger.record_close(trade(IntentKind::Close, Side::Sell, 103.0), &long_position());
        assert_eq!(ledger.cash_flow(), 6.0);
        assert_eq!(ledger.trade_count(), 2);
    }

    #[test]
    fn test_realized_pnl_long_and_short() {
        let mut ledger = TradeLedger::new();
        let entry = ledger.record_close(trade(IntentKind::Close, Side::Sell, 103.0), &long_position());
        assert_eq!(entry.realized_pnl, Some(6.0));

        let mut short = long_position();
        short.side = Side::Sell;
        let entry = ledger.record_close(trade(IntentKind::Close, Side::Buy, 103.0), &short);
        assert_eq!(entry.realized_pnl, Some(-6.0));
        assert_eq!(ledger.cumulative_pnl(), 0.0);
    }

    #[test]
    fn test_external_close_is_booked() {
        let mut ledger = TradeLedger::new();
        ledger.record_open(trade(IntentKind::Open, Side::Buy, 100.0));
        let entry = ledger.record_external_close(trade(IntentKind::Close, Side::Sell, 105.0), &long_position());

        assert_eq!(entry.realized_pnl, Some(10.0));
        assert_eq!(ledger.trade_count(), 2);
        assert_eq!(ledger.cumulative_pnl(), 10.0);
        assert_eq!(ledger.cash_flow(), 10.0);
    }

    #[test]
    fn test_win_rate() {
        let mut ledger = TradeLedger::new();
        assert_eq!(ledger.win_rate(), 0.0);

        ledger.record_open(trade(IntentKind::Open, Side::Buy, 100.0));
        assert_eq!(ledger.win_rate(), 0.0);

        ledger.record_close(trade(IntentKind::Close, Side::Sell, 103.0), &long_position());
        ledger.record_close(trade(IntentKind::Close, Side::Sell, 98.0), &long_position());
        ledger.record_close(trade(IntentKind::Close, Side::Sell, 101.0), &long_position());
        ledger.record_close(trade(IntentKind::Close, Side::Sell, 100.0), &long_position());

        // Two winners out of four closes; a flat close is not a win
        assert_eq!(ledger.win_rate(), 50.0);
    }

    #[test]
    fn test_jsonl_side_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let mut ledger = TradeLedger::with_file(&path).unwrap();
        ledger.record_open(trade(IntentKind::Open, Side::Sell, 50.0));
        ledger.record_close(trade(IntentKind::Close, Side::Buy, 45.0), &{
            let mut p = long_position();
            p.side = Side::Sell;
            p.open_price = 50.0;
            p
        });

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["cash_flow"], 100.0);
        assert_eq!(lines[1]["realized_pnl"], 10.0);
        assert_eq!(lines[1]["symbol"], "WIN$N");
    }
}
