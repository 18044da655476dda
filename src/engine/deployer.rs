use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use super::{SessionReport, StopReason, TradingEngine};
use crate::config::DeployConfig;
use crate::execution::ExitReason;
use crate::gateway::{MarketDataFeed, OrderGateway};
use crate::session::{Clock, SessionClock, WaitOutcome};
use crate::strategy::{SignalEvaluator, StrategyRegistry};
use crate::Result;

/// Runs trading sessions for one deployment file
pub struct Deployer {
    config: DeployConfig,
    config_path: PathBuf,
    evaluator: Arc<dyn SignalEvaluator>,
    feed: Arc<dyn MarketDataFeed>,
    gateway: Arc<dyn OrderGateway>,
    clock: Arc<dyn Clock>,
}

impl Deployer {
    /// Resolve the strategy and validate its parameters; any failure is startup-fatal
    pub fn new(
        config: DeployConfig,
        config_path: impl AsRef<Path>,
        registry: &StrategyRegistry,
        feed: Arc<dyn MarketDataFeed>,
        gateway: Arc<dyn OrderGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let evaluator = config.resolve_strategy(registry)?;
        let config_path = config_path.as_ref().to_path_buf();

        tracing::info!("Configuration loaded: {}", config_path.display());
        tracing::info!("Strategy: {}", config.strategy);
        tracing::info!("Symbol: {} ({})", config.symbol, config.timeframe);
        tracing::info!("Trading hours: {:?}", config.hours);
        tracing::info!("Magic number: {}", config.magic_number);

        Ok(Self {
            config,
            config_path,
            evaluator,
            feed,
            gateway,
            clock,
        })
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Strategy overview as printed by `--mode summary`
    pub fn summary(&self) -> Value {
        self.config.summary(&self.config_path)
    }

    /// Trade from now until the end time if the current hour is configured
    pub async fn run_current_session(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Option<SessionReport>> {
        let hour = self.session_clock().current_hour();
        if !self.config.is_trading_hour(hour) {
            tracing::info!("No trading configured for {}h", hour);
            return Ok(None);
        }

        tracing::info!("✅ Deploying for {}h", hour);
        self.run_session(shutdown).await.map(Some)
    }

    /// Wait for the first configured hour, then trade until the end time
    pub async fn run_full_day(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Option<SessionReport>> {
        tracing::info!("=== STARTING TRADING DAY ===");
        tracing::info!("Configured hours: {:?}", self.config.hours);

        let Some(first) = self.config.first_hour() else {
            return Ok(None);
        };
        if self.session_clock().wait_until_hour(first, shutdown).await == WaitOutcome::Cancelled {
            tracing::warn!("Trading day cancelled before {}h", first);
            return Ok(None);
        }

        let report = self.run_session(shutdown).await;
        tracing::info!("=== TRADING DAY FINISHED ===");
        report.map(Some)
    }

    /// Scoped gateway session: connect, trade, flatten, and always disconnect
    async fn run_session(&self, shutdown: &mut watch::Receiver<bool>) -> Result<SessionReport> {
        self.gateway.connect().await?;

        let result = self.drive(shutdown).await;

        if let Err(e) = self.gateway.disconnect().await {
            tracing::warn!("Disconnect failed: {}", e);
        }
        result
    }

    async fn drive(&self, shutdown: &mut watch::Receiver<bool>) -> Result<SessionReport> {
        let mut engine = TradingEngine::new(
            &self.config,
            self.evaluator.clone(),
            self.feed.clone(),
            self.gateway.clone(),
            self.clock.clone(),
        )?;

        if let Err(e) = engine.startup().await {
            tracing::error!("Startup failed: {}", e);
            engine.flatten(ExitReason::Shutdown).await;
            return Err(e);
        }

        let stop = engine.run(shutdown).await;
        let reason = match stop {
            StopReason::EndTime => ExitReason::SessionEnd,
            StopReason::Interrupted => ExitReason::Shutdown,
        };
        engine.flatten(reason).await;

        let report = engine.report(stop);
        log_report(&report);
        Ok(report)
    }

    fn session_clock(&self) -> SessionClock {
        SessionClock::new(
            self.clock.clone(),
            self.config.engine.end_time,
            self.config.engine.max_wait_slice(),
        )
    }
}

fn log_report(report: &SessionReport) {
    let rule = "=".repeat(50);
    tracing::info!("{}", rule);
    tracing::info!("📋 Session finished ({:?})", report.stop);
    tracing::info!(
        "Ticks {} | New bars {} | Tick errors {}",
        report.ticks,
        report.new_bars,
        report.tick_errors
    );
    tracing::info!(
        "Trades {} | Cash flow {:.2} | Cumulative P&L {:.2} | Win rate {:.1}% | Final state {}",
        report.trades,
        report.cash_flow,
        report.cumulative_pnl,
        report.win_rate,
        report.final_state
    );
    tracing::info!("{}", rule);
}
