use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use autotrader::config::DeployConfig;
use autotrader::engine::Deployer;
use autotrader::gateway::{BridgeGateway, MarketDataFeed, OrderGateway, PaperGateway};
use autotrader::session::SystemClock;
use autotrader::strategy::StrategyRegistry;
use autotrader::TraderError;
use chrono::NaiveTime;
use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "autotrader=info";
const PAPER_START_PRICE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Trade the current hour's session until the end time
    Current,
    /// Wait for the first configured hour, then trade until the end time
    FullDay,
    /// Print the deployment summary and exit
    Summary,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Hour-parameterized strategy execution against a broker terminal")]
struct Args {
    /// Deployment file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Mode::Current)]
    mode: Mode,

    /// Session end time (HH:MM), overrides engine.end_time
    #[arg(long, value_parser = parse_end_time)]
    end: Option<NaiveTime>,

    /// Trade against the in-memory simulated terminal
    #[arg(long, conflicts_with = "bridge_url")]
    paper: bool,

    /// Random walk seed for --paper
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Terminal bridge base URL
    #[arg(long, env = "BRIDGE_URL")]
    bridge_url: Option<String>,

    #[arg(long, env = "BRIDGE_TOKEN", hide_env_values = true)]
    bridge_token: Option<String>,

    #[arg(long, env = "MT5_LOGIN")]
    login: Option<u64>,

    #[arg(long, env = "MT5_SERVER")]
    server: Option<String>,

    /// Append logs to this file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn parse_end_time(value: &str) -> std::result::Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| format!("invalid time `{}`, expected HH:MM", value))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = setup_logging(args.log_file.as_deref()) {
        eprintln!("Failed to set up logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("❌ {:#}", e);
            let fatal = e
                .downcast_ref::<TraderError>()
                .is_some_and(TraderError::is_startup_fatal);
            if fatal {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = DeployConfig::load(&args.config)?;
    if let Some(end) = args.end {
        config.engine.end_time = end;
    }
    let registry = StrategyRegistry::builtin();

    if args.mode == Mode::Summary {
        config.resolve_strategy(&registry)?;
        println!("{}", serde_json::to_string_pretty(&config.summary(&args.config))?);
        return Ok(());
    }

    tracing::info!("🚀 autotrader starting");
    let (feed, gateway) = build_gateway(&args, &config)?;
    let deployer = Deployer::new(config, &args.config, &registry, feed, gateway, Arc::new(SystemClock))?;

    let (shutdown_tx, mut shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("⚠️  Received Ctrl+C, flattening and shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = match args.mode {
        Mode::FullDay => deployer.run_full_day(&mut shutdown).await?,
        _ => deployer.run_current_session(&mut shutdown).await?,
    };
    if report.is_none() {
        tracing::info!("No session was run");
    }
    Ok(())
}

fn build_gateway(args: &Args, config: &DeployConfig) -> Result<(Arc<dyn MarketDataFeed>, Arc<dyn OrderGateway>)> {
    if args.paper {
        tracing::info!("📝 Paper trading {} on a simulated feed (seed {})", config.symbol, args.seed);
        let paper = Arc::new(
            PaperGateway::new(PaperGateway::default_spec(&config.symbol)).with_random_walk(
                args.seed,
                config.timeframe,
                PAPER_START_PRICE,
                config.engine.history_bars,
            ),
        );
        let feed: Arc<dyn MarketDataFeed> = paper.clone();
        let gateway: Arc<dyn OrderGateway> = paper;
        return Ok((feed, gateway));
    }

    let url = args
        .bridge_url
        .as_deref()
        .context("no gateway selected: pass --paper or --bridge-url (or set BRIDGE_URL)")?;
    let mut bridge = BridgeGateway::new(url)?;
    if let Some(token) = &args.bridge_token {
        bridge = bridge.with_token(token.clone());
    }
    if let (Some(login), Some(server)) = (args.login, &args.server) {
        bridge = bridge.with_account(login, server.clone());
    }
    tracing::info!("Using terminal bridge at {}", bridge.base_url());

    let bridge = Arc::new(bridge);
    let feed: Arc<dyn MarketDataFeed> = bridge.clone();
    let gateway: Arc<dyn OrderGateway> = bridge;
    Ok((feed, gateway))
}

fn setup_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}
