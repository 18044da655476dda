use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::retcode;
use super::{CheckResult, MarketDataFeed, OrderGateway, OrderRequest, OrderResult};
use crate::error::TraderError;
use crate::models::{AccountInfo, Bar, BrokerPosition, Side, SymbolSpec, Tick, Timeframe};
use crate::Result;

/// Scripted terminal answer for the next `submit`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptedResponse {
    Code(u32),
    /// DONE_PARTIAL with this filled volume
    Partial(f64),
    /// Null result
    Null,
}

/// Synthetic bar generator for unattended paper sessions
struct RandomWalk {
    rng: StdRng,
    timeframe: Timeframe,
    volatility: f64,
}

impl RandomWalk {
    fn next_bar(&mut self, timestamp: DateTime<Utc>, prev_close: f64) -> Bar {
        let open = prev_close;
        let close = (open * (1.0 + self.rng.gen_range(-self.volatility..self.volatility))).max(f64::EPSILON);
        let wick = open.max(close) * self.rng.gen_range(0.0..self.volatility / 2.0);
        Bar {
            timestamp,
            open,
            high: open.max(close) + wick,
            low: (open.min(close) - wick).max(f64::EPSILON),
            close,
            tick_volume: self.rng.gen_range(50..500),
            spread: 1,
            volume: self.rng.gen_range(1..100),
        }
    }
}

struct PaperState {
    connected: bool,
    disconnects: usize,
    spec: SymbolSpec,
    account: AccountInfo,
    /// Completed bars, oldest first
    bars: Vec<Bar>,
    walk: Option<RandomWalk>,
    quote: Option<(f64, f64)>,
    positions: Vec<BrokerPosition>,
    next_ticket: u64,
    scripted: VecDeque<ScriptedResponse>,
    scripted_checks: VecDeque<u32>,
    requests: Vec<OrderRequest>,
    fail_close_all: bool,
}

/// In-memory broker terminal: feed, quotes, position book and order log
pub struct PaperGateway {
    state: Mutex<PaperState>,
}

impl PaperGateway {
    pub fn new(spec: SymbolSpec) -> Self {
        Self {
            state: Mutex::new(PaperState {
                connected: false,
                disconnects: 0,
                spec,
                account: AccountInfo {
                    login: 0,
                    balance: 100_000.0,
                    equity: 100_000.0,
                    profit: 0.0,
                    currency: "USD".to_string(),
                },
                bars: Vec::new(),
                walk: None,
                quote: None,
                positions: Vec::new(),
                next_ticket: 1,
                scripted: VecDeque::new(),
                scripted_checks: VecDeque::new(),
                requests: Vec::new(),
                fail_close_all: false,
            }),
        }
    }

    /// Default instrument used by `--paper`
    pub fn default_spec(symbol: &str) -> SymbolSpec {
        SymbolSpec {
            symbol: symbol.to_string(),
            digits: 2,
            tick_size: 0.01,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            filling_modes: vec![crate::models::FillPolicy::Ioc, crate::models::FillPolicy::Return],
            trade_allowed: true,
        }
    }

    pub fn with_bars(self, bars: Vec<Bar>) -> Self {
        self.lock().bars = bars;
        self
    }

    /// Generate bars from a seeded random walk as wall-clock time advances
    pub fn with_random_walk(self, seed: u64, timeframe: Timeframe, start_price: f64, history: usize) -> Self {
        {
            let mut state = self.lock();
            let mut walk = RandomWalk {
                rng: StdRng::seed_from_u64(seed),
                timeframe,
                volatility: 0.002,
            };
            let current = timeframe.bucket_start(Utc::now());
            let mut close = start_price;
            state.bars = (1..=history as i32)
                .rev()
                .map(|back| {
                    let bar = walk.next_bar(current - timeframe.duration() * back, close);
                    close = bar.close;
                    bar
                })
                .collect();
            state.walk = Some(walk);
        }
        self
    }

    /// Publish a newly completed bar
    pub fn publish(&self, bar: Bar) {
        self.lock().bars.push(bar);
    }

    /// Replace the last completed bar (terminal correction)
    pub fn correct_last(&self, bar: Bar) {
        let mut state = self.lock();
        if let Some(last) = state.bars.last_mut() {
            *last = bar;
        }
    }

    pub fn set_quote(&self, bid: f64, ask: f64) {
        self.lock().quote = Some((bid, ask));
    }

    /// Queue the answer for an upcoming `submit`; unscripted submits succeed
    pub fn script(&self, response: ScriptedResponse) {
        self.lock().scripted.push_back(response);
    }

    /// Queue the retcode for an upcoming `check`; unscripted checks pass
    pub fn script_check(&self, code: u32) {
        self.lock().scripted_checks.push_back(code);
    }

    pub fn fail_close_all(&self, fail: bool) {
        self.lock().fail_close_all = fail;
    }

    /// Simulate the broker closing a position (TP/SL hit)
    pub fn close_at_broker(&self, ticket: u64) -> bool {
        let mut state = self.lock();
        let before = state.positions.len();
        state.positions.retain(|p| p.ticket != ticket);
        state.positions.len() != before
    }

    /// Place a position directly in the book (e.g. left over from an earlier run)
    pub fn seed_position(&self, side: Side, volume: f64, magic: u64) -> u64 {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let price = state.bars.last().map(|b| b.close).unwrap_or(0.0);
        let symbol = state.spec.symbol.clone();
        state.positions.push(BrokerPosition {
            ticket,
            symbol,
            side,
            volume,
            price_open: price,
            sl: 0.0,
            tp: 0.0,
            magic,
            profit: 0.0,
        });
        ticket
    }

    /// Every request passed to `submit`, in order
    pub fn requests(&self) -> Vec<OrderRequest> {
        self.lock().requests.clone()
    }

    pub fn positions(&self) -> Vec<BrokerPosition> {
        self.lock().positions.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        // A poisoned lock only means a test panicked mid-update; the book is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PaperState {
    fn catch_up(&mut self, now: DateTime<Utc>) {
        let Some(walk) = self.walk.as_mut() else {
            return;
        };
        let current = walk.timeframe.bucket_start(now);
        while let Some(last) = self.bars.last() {
            let next_start = last.timestamp + walk.timeframe.duration();
            if next_start >= current {
                break;
            }
            let bar = walk.next_bar(next_start, last.close);
            self.bars.push(bar);
        }
    }

    fn forming_bar(&self) -> Option<Bar> {
        let last = self.bars.last()?;
        let timeframe = self.walk.as_ref().map(|w| w.timeframe).unwrap_or(Timeframe::M1);
        Some(Bar {
            timestamp: last.timestamp + timeframe.duration(),
            open: last.close,
            high: last.close,
            low: last.close,
            close: last.close,
            tick_volume: 0,
            spread: last.spread,
            volume: 0,
        })
    }

    fn quote(&self) -> Option<(f64, f64)> {
        self.quote.or_else(|| {
            self.bars
                .last()
                .map(|b| (b.close, b.close + self.spec.tick_size.max(0.0)))
        })
    }

    fn fill(&mut self, request: &OrderRequest, volume: f64) -> u64 {
        if let Some(ticket) = request.position {
            if let Some(index) = self.positions.iter().position(|p| p.ticket == ticket) {
                let remaining = self.positions[index].volume - volume;
                if remaining > 1e-9 {
                    self.positions[index].volume = remaining;
                } else {
                    self.positions.remove(index);
                }
            }
            return ticket;
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.positions.push(BrokerPosition {
            ticket,
            symbol: request.symbol.clone(),
            side: request.side,
            volume,
            price_open: request.price,
            sl: request.sl.unwrap_or(0.0),
            tp: request.tp.unwrap_or(0.0),
            magic: request.magic,
            profit: 0.0,
        });
        ticket
    }
}

#[async_trait]
impl MarketDataFeed for PaperGateway {
    async fn get_history(&self, symbol: &str, _timeframe: Timeframe, count: usize) -> Result<Vec<Bar>> {
        let mut state = self.lock();
        if symbol != state.spec.symbol {
            return Err(TraderError::Feed(format!("unknown symbol {}", symbol)));
        }
        state.catch_up(Utc::now());

        let mut bars: Vec<Bar> = state.bars.clone();
        bars.extend(state.forming_bar());
        let skip = bars.len().saturating_sub(count);
        Ok(bars.split_off(skip))
    }

    async fn get_latest(&self, symbol: &str, _timeframe: Timeframe) -> Result<Option<Bar>> {
        let mut state = self.lock();
        if symbol != state.spec.symbol {
            return Err(TraderError::Feed(format!("unknown symbol {}", symbol)));
        }
        state.catch_up(Utc::now());
        Ok(state.bars.last().cloned())
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn connect(&self) -> Result<()> {
        self.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.lock();
        state.connected = false;
        state.disconnects += 1;
        Ok(())
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        Ok(self.lock().account.clone())
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolSpec> {
        let state = self.lock();
        if symbol != state.spec.symbol {
            return Err(TraderError::Gateway(format!("unknown symbol {}", symbol)));
        }
        Ok(state.spec.clone())
    }

    async fn tick(&self, symbol: &str) -> Result<Tick> {
        let state = self.lock();
        let (bid, ask) = state
            .quote()
            .ok_or_else(|| TraderError::Gateway(format!("no quote for {}", symbol)))?;
        Ok(Tick {
            bid,
            ask,
            time: Utc::now(),
        })
    }

    async fn check(&self, _request: &OrderRequest) -> Result<CheckResult> {
        let code = self.lock().scripted_checks.pop_front();
        Ok(match code {
            Some(code) => CheckResult {
                retcode: code,
                comment: retcode::describe(code).to_string(),
            },
            None => CheckResult::ok(),
        })
    }

    async fn submit(&self, request: &OrderRequest) -> Result<Option<OrderResult>> {
        let mut state = self.lock();
        state.requests.push(request.clone());

        let response = state
            .scripted
            .pop_front()
            .unwrap_or(ScriptedResponse::Code(retcode::DONE));

        let (code, volume) = match response {
            ScriptedResponse::Null => return Ok(None),
            ScriptedResponse::Partial(volume) => (retcode::DONE_PARTIAL, volume),
            ScriptedResponse::Code(code) => (code, request.volume),
        };

        let accepted = matches!(retcode::classify(code), retcode::Retcode::Accepted { .. });
        let ticket = if accepted { state.fill(request, volume) } else { 0 };

        Ok(Some(OrderResult {
            retcode: code,
            deal: ticket,
            order: ticket,
            volume: if accepted { volume } else { 0.0 },
            price: if accepted { request.price } else { 0.0 },
            comment: retcode::describe(code).to_string(),
        }))
    }

    async fn positions_for(&self, symbol: &str) -> Result<Vec<BrokerPosition>> {
        Ok(self
            .lock()
            .positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn close_all(&self, symbol: &str) -> Result<bool> {
        let mut state = self.lock();
        if state.fail_close_all {
            return Ok(false);
        }
        state.positions.retain(|p| p.symbol != symbol);
        Ok(true)
    }
}
