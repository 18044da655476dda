// Real-time execution engine for one instrument
pub mod deployer;

pub use deployer::Deployer;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::{DeployConfig, EngineSettings, HourParameters, ParameterProvider};
use crate::error::TraderError;
use crate::execution::{
    DecisionContext, ExecutionAction, ExecutionDecision, Executor, ExitReason, PositionManager,
    PriceFeed, Reconciliation, TradeLedger,
};
use crate::gateway::{MarketDataFeed, OrderAdapter, OrderGateway};
use crate::models::{IntentKind, OrderIntent, OrderOutcome, Position, RejectionClass, Side, Signal, Timeframe, Trade};
use crate::session::{Clock, ParameterChange, ParameterController, SessionClock};
use crate::strategy::{evaluate_positions, EvaluatedSignal, SignalEvaluator};
use crate::Result;

/// How far a decision got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Every action was accepted
    Completed,
    /// Retryable failure; the transition is attempted again on the next tick
    Pending,
    /// Configuration or environment rejection; the transition is dropped
    Abandoned,
}

/// What one tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The feed returned nothing
    EmptyRead,
    /// No new bar and no pending transition
    Idle,
    /// New bar, but no hour parameters have been seen yet
    NoParameters,
    Decided {
        signal: EvaluatedSignal,
        decision: ExecutionDecision,
        status: ExecutionStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTime,
    Interrupted,
}

/// Counters and totals of a finished session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub stop: StopReason,
    pub ticks: u64,
    pub new_bars: u64,
    pub tick_errors: u64,
    pub trades: usize,
    pub cash_flow: f64,
    pub cumulative_pnl: f64,
    /// Winning closes in percent of all closes
    pub win_rate: f64,
    pub final_state: Signal,
}

/// Polls bars, evaluates the strategy and executes signal transitions
///
/// Ticks run strictly one after another, so there is only ever one decision
/// in flight and the single-position invariant needs no locking.
pub struct TradingEngine {
    symbol: String,
    strategy: String,
    timeframe: Timeframe,
    lot_size: f64,
    magic_number: u64,
    settings: EngineSettings,
    feed: PriceFeed,
    gateway: Arc<dyn OrderGateway>,
    adapter: OrderAdapter,
    positions: PositionManager,
    executor: Executor,
    ledger: TradeLedger,
    parameters: ParameterController,
    evaluator: Arc<dyn SignalEvaluator>,
    clock: SessionClock,
    last_evaluation: Option<EvaluatedSignal>,
    /// Bar whose session-cutoff close was abandoned; not retried until the next bar
    abandoned_cutoff: Option<DateTime<Utc>>,
    intents: Vec<OrderIntent>,
    ticks: u64,
    new_bars: u64,
    tick_errors: u64,
}

impl TradingEngine {
    pub fn new(
        config: &DeployConfig,
        evaluator: Arc<dyn SignalEvaluator>,
        feed: Arc<dyn MarketDataFeed>,
        gateway: Arc<dyn OrderGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let settings = config.engine.clone();
        let ledger = match &settings.ledger_path {
            Some(path) => TradeLedger::with_file(path)?,
            None => TradeLedger::new(),
        };
        let provider: Arc<dyn ParameterProvider> = Arc::new(config.clone());

        Ok(Self {
            symbol: config.symbol.clone(),
            strategy: config.strategy.clone(),
            timeframe: config.timeframe,
            lot_size: config.lot_size,
            magic_number: config.magic_number,
            feed: PriceFeed::new(feed, config.symbol.clone(), config.timeframe, settings.history_bars),
            adapter: OrderAdapter::new(
                gateway.clone(),
                config.symbol.clone(),
                config.magic_number,
                settings.deviation,
            ),
            gateway,
            positions: PositionManager::new(config.symbol.clone(), config.magic_number),
            executor: Executor::new(settings.neutral_policy),
            ledger,
            parameters: ParameterController::new(provider),
            evaluator,
            clock: SessionClock::new(clock, settings.end_time, settings.max_wait_slice()),
            settings,
            last_evaluation: None,
            abandoned_cutoff: None,
            intents: Vec::new(),
            ticks: 0,
            new_bars: 0,
            tick_errors: 0,
        })
    }

    /// Replace the hour-parameter source (defaults to the deployment file)
    pub fn with_parameter_provider(mut self, provider: Arc<dyn ParameterProvider>) -> Self {
        self.parameters = ParameterController::new(provider);
        self
    }

    /// Print the session banner, load history and pick up leftover positions
    pub async fn startup(&mut self) -> Result<()> {
        let account = self.gateway.account_info().await?;
        let rule = "-".repeat(70);
        tracing::info!("{}", rule);
        tracing::info!(
            "🚀 {} on {} ({}) | magic {} | lot {}",
            self.strategy,
            self.symbol,
            self.timeframe,
            self.magic_number,
            self.lot_size
        );
        tracing::info!(
            "Account {} | Balance {:.2} {} | Equity {:.2} | Profit {:.2}",
            account.login,
            account.balance,
            account.currency,
            account.equity,
            account.profit
        );
        tracing::info!("Session ends at {}", self.clock.end_time().format("%H:%M"));
        tracing::info!("{}", rule);

        self.adapter.spec().await?;
        let loaded = self.feed.load_history(self.settings.history_bars).await?;
        if loaded == 0 {
            tracing::warn!(symbol = %self.symbol, "No price history yet, waiting for the first bar");
        }

        self.sync_positions().await
    }

    /// Poll until the end time or until `shutdown` fires
    ///
    /// A failing tick is logged and the loop goes on. Flattening is left to
    /// the caller.
    pub async fn run(&mut self, shutdown: &mut watch::Receiver<bool>) -> StopReason {
        tracing::info!(
            "▶️  Trading loop started, polling every {}ms",
            self.settings.poll_interval_ms
        );

        loop {
            if *shutdown.borrow() {
                return StopReason::Interrupted;
            }
            if self.clock.is_over() {
                tracing::info!("⏰ End time {} reached", self.clock.end_time().format("%H:%M"));
                return StopReason::EndTime;
            }

            if let Err(e) = self.tick().await {
                self.tick_errors += 1;
                tracing::error!(symbol = %self.symbol, "❌ Tick failed: {}", e);
            }

            if !self.clock.pause(self.settings.poll_interval(), shutdown).await {
                tracing::warn!("⚠️  Trading loop interrupted");
                return StopReason::Interrupted;
            }
        }
    }

    /// One cooperative step: parameter check, feed read, evaluate, execute
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.ticks += 1;

        let hour = self.clock.current_hour();
        if let ParameterChange::Deactivated { hour, .. } = self.parameters.on_tick(hour) {
            if self.settings.flatten_on_inactive_hour && self.positions.has_open_position() {
                tracing::warn!("{}h has no parameters, closing the open position", hour);
                self.flatten(ExitReason::InactiveHour).await;
            }
        }

        let Some(update) = self.feed.poll().await? else {
            return Ok(TickOutcome::EmptyRead);
        };

        if update.is_new_bar() {
            self.new_bars += 1;
            // Snapshot taken before evaluation; a later swap cannot tear it
            let Some(params) = self.parameters.evaluation_params() else {
                tracing::debug!(symbol = %self.symbol, "New bar ignored, no parameters yet");
                return Ok(TickOutcome::NoParameters);
            };

            let window = self.feed.window();
            let signals = evaluate_positions(
                self.evaluator.as_ref(),
                &window,
                &params.strategy,
                self.settings.session_cutoff_hour,
            )?;
            let Some(latest) = signals.last().copied() else {
                return Ok(TickOutcome::Idle);
            };

            if let Some(bar) = window.last() {
                tracing::info!(
                    symbol = %self.symbol,
                    "📊 Bar {} close {} | signal {} | position {}",
                    bar.timestamp.format("%Y-%m-%d %H:%M"),
                    bar.close,
                    latest.signal,
                    self.positions.state()
                );
            }
            self.last_evaluation = Some(latest);
            return self.act(latest, &params).await;
        }

        match (self.last_evaluation, self.parameters.evaluation_params()) {
            (Some(latest), Some(params)) if self.is_pending(&latest) => {
                tracing::debug!(symbol = %self.symbol, "Retrying pending transition to {}", latest.signal);
                self.act(latest, &params).await
            }
            _ => Ok(TickOutcome::Idle),
        }
    }

    fn is_pending(&self, latest: &EvaluatedSignal) -> bool {
        if latest.session_closed {
            return self.positions.has_open_position() && self.abandoned_cutoff != Some(latest.timestamp);
        }
        latest.signal != self.positions.last_signal()
    }

    async fn act(&mut self, latest: EvaluatedSignal, params: &HourParameters) -> Result<TickOutcome> {
        self.sync_positions().await?;

        let ctx = DecisionContext {
            session_closed: latest.session_closed,
            allow_open: self.parameters.is_active(),
        };
        let decision = self.executor.process_signal(&self.positions, latest.signal, ctx);

        let status = if decision.is_noop() {
            tracing::debug!(symbol = %self.symbol, "{}", decision.reason);
            ExecutionStatus::Completed
        } else {
            tracing::info!(symbol = %self.symbol, "⚡ {}", decision.reason);
            self.execute(&decision, params).await?
        };

        if status != ExecutionStatus::Pending {
            self.positions.mark_acted(decision.target);
        }
        if status == ExecutionStatus::Abandoned && latest.session_closed {
            tracing::warn!(
                symbol = %self.symbol,
                "Session-cutoff close abandoned, leaving the position to the end-of-session flatten"
            );
            self.abandoned_cutoff = Some(latest.timestamp);
        }

        Ok(TickOutcome::Decided {
            signal: latest,
            decision,
            status,
        })
    }

    async fn execute(&mut self, decision: &ExecutionDecision, params: &HourParameters) -> Result<ExecutionStatus> {
        for action in &decision.actions {
            let status = match *action {
                ExecutionAction::Close { reason } => self.close_current(reason).await?,
                ExecutionAction::Open { side } => self.open(side, params).await?,
            };
            // A failed close must never be followed by the open of a reversal
            if status != ExecutionStatus::Completed {
                return Ok(status);
            }
        }
        Ok(ExecutionStatus::Completed)
    }

    async fn open(&mut self, side: Side, params: &HourParameters) -> Result<ExecutionStatus> {
        let hour = self.clock.current_hour();
        let intent = OrderIntent::open(side, self.lot_size, params.sl, params.tp)
            .with_comment(format!("{}_{}h", self.strategy, hour))
            .with_filling(self.settings.preferred_filling);

        let Some(outcome) = self.submit(&intent).await? else {
            return Ok(ExecutionStatus::Pending);
        };
        let (ticket, price, volume) = match outcome {
            OrderOutcome::Accepted {
                ticket,
                price,
                volume,
                ..
            } => (ticket, price, volume),
            other => return Ok(failure_status(&other)),
        };

        let direction = match side {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        };
        self.positions.open_position(Position {
            ticket,
            side,
            open_price: price,
            stop_loss: price - direction * params.sl,
            take_profit: price + direction * params.tp,
            volume,
            opened_at: self.now_utc(),
        })?;

        let trade = self.trade(&intent, price, volume, ticket);
        self.ledger.record_open(trade);
        Ok(ExecutionStatus::Completed)
    }

    async fn close_current(&mut self, reason: ExitReason) -> Result<ExecutionStatus> {
        let Some(position) = self.positions.position().cloned() else {
            return Ok(ExecutionStatus::Completed);
        };

        let intent = OrderIntent::close(position.side, position.volume, position.ticket)
            .with_comment(format!("close_{}", self.strategy))
            .with_filling(self.settings.preferred_filling);

        let Some(outcome) = self.submit(&intent).await? else {
            return Ok(ExecutionStatus::Pending);
        };
        let (price, volume) = match outcome {
            OrderOutcome::Accepted { price, volume, .. } => (price, volume),
            other => return Ok(failure_status(&other)),
        };

        let closed = self.positions.close_position(volume, reason)?;
        let trade = self.trade(&intent, price, volume, position.ticket);
        self.ledger.record_close(trade, &position);

        Ok(if closed.is_some() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Pending
        })
    }

    /// Submit through the adapter; `None` when pre-flight refused the intent
    async fn submit(&mut self, intent: &OrderIntent) -> Result<Option<OrderOutcome>> {
        self.intents.push(intent.clone());
        match self.adapter.submit(intent).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(TraderError::Preflight(reason)) => {
                tracing::error!(
                    symbol = %self.symbol,
                    tag = %intent.tag,
                    kind = ?intent.kind,
                    side = %intent.side,
                    volume = intent.volume,
                    "Pre-flight rejected order: {}",
                    reason
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Force the instrument flat: close our position, then close-all whatever remains
    ///
    /// Never fails; problems are logged. Returns the number of order intents emitted.
    pub async fn flatten(&mut self, reason: ExitReason) -> usize {
        let before = self.intents.len();

        if let Err(e) = self.sync_positions().await {
            tracing::warn!(symbol = %self.symbol, "Could not read broker positions before flatten: {}", e);
        }

        if self.positions.has_open_position() {
            match self.close_current(reason).await {
                Ok(ExecutionStatus::Completed) => {}
                Ok(status) => tracing::warn!(
                    symbol = %self.symbol,
                    "Close during flatten ended {:?}, falling back to close-all",
                    status
                ),
                Err(e) => tracing::warn!(
                    symbol = %self.symbol,
                    "Close during flatten failed: {}, falling back to close-all",
                    e
                ),
            }
        }

        let leftover = match self.gateway.positions_for(&self.symbol).await {
            Ok(open) => open.iter().any(|p| p.magic == self.magic_number),
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, "Could not verify flatten: {}", e);
                false
            }
        };

        if leftover || self.positions.has_open_position() {
            tracing::warn!(symbol = %self.symbol, "🧹 Positions remain, sending close-all");
            match self.gateway.close_all(&self.symbol).await {
                Ok(true) => {
                    if let Some(position) = self.positions.reset_flat() {
                        self.book_external_close(&position).await;
                    }
                }
                Ok(false) => tracing::error!(symbol = %self.symbol, "close-all reported failure"),
                Err(e) => tracing::error!(symbol = %self.symbol, "close-all failed: {}", e),
            }
        }

        tracing::info!(symbol = %self.symbol, reason = ?reason, "Flattened, state {}", self.positions.state());
        self.intents.len() - before
    }

    async fn sync_positions(&mut self) -> Result<()> {
        let broker = self.gateway.positions_for(&self.symbol).await?;
        let now = self.now_utc();
        if let Reconciliation::ClosedExternally(position) = self.positions.reconcile(&broker, now) {
            self.book_external_close(&position).await;
        }
        Ok(())
    }

    /// Book a position that left the broker without a close fill of ours
    async fn book_external_close(&mut self, position: &Position) {
        let price = self.estimate_exit(position).await;
        let trade = Trade {
            id: Uuid::new_v4(),
            symbol: self.symbol.clone(),
            kind: IntentKind::Close,
            side: position.side.opposite(),
            price,
            volume: position.volume,
            ticket: position.ticket,
            timestamp: self.now_utc(),
        };
        self.ledger.record_external_close(trade, position);
    }

    /// Closing side of the current quote, held inside the position's SL/TP band
    ///
    /// Falls back to the last bar close, then to the open price.
    async fn estimate_exit(&self, position: &Position) -> f64 {
        let quote = match self.gateway.tick(&self.symbol).await {
            Ok(tick) => match position.side {
                Side::Buy => tick.bid,
                Side::Sell => tick.ask,
            },
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, "No quote to price external close: {}", e);
                match self.feed.last_bar() {
                    Some(bar) => bar.close,
                    None => return position.open_price,
                }
            }
        };

        let (low, high) = match position.side {
            Side::Buy => (position.stop_loss, position.take_profit),
            Side::Sell => (position.take_profit, position.stop_loss),
        };
        // Broker-adopted positions may carry no stops (0.0)
        if low > 0.0 && high > low {
            quote.clamp(low, high)
        } else {
            quote
        }
    }

    fn trade(&self, intent: &OrderIntent, price: f64, volume: f64, ticket: u64) -> Trade {
        Trade {
            id: intent.tag,
            symbol: self.symbol.clone(),
            kind: intent.kind,
            side: intent.side,
            price,
            volume,
            ticket,
            timestamp: self.now_utc(),
        }
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now().and_utc()
    }

    pub fn report(&self, stop: StopReason) -> SessionReport {
        SessionReport {
            stop,
            ticks: self.ticks,
            new_bars: self.new_bars,
            tick_errors: self.tick_errors,
            trades: self.ledger.trade_count(),
            cash_flow: self.ledger.cash_flow(),
            cumulative_pnl: self.ledger.cumulative_pnl(),
            win_rate: self.ledger.win_rate(),
            final_state: self.positions.state(),
        }
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    /// Every intent handed to the order adapter, in order
    pub fn intents(&self) -> &[OrderIntent] {
        &self.intents
    }

    pub fn active_parameters(&self) -> Option<Arc<HourParameters>> {
        self.parameters.active()
    }

    pub fn last_evaluation(&self) -> Option<EvaluatedSignal> {
        self.last_evaluation
    }

    pub fn session_clock(&self) -> &SessionClock {
        &self.clock
    }
}

fn failure_status(outcome: &OrderOutcome) -> ExecutionStatus {
    match outcome {
        OrderOutcome::Accepted { .. } => ExecutionStatus::Completed,
        OrderOutcome::Rejected {
            class: RejectionClass::Transient,
            ..
        }
        | OrderOutcome::GatewayError { .. } => ExecutionStatus::Pending,
        OrderOutcome::Rejected { .. } => ExecutionStatus::Abandoned,
    }
}
