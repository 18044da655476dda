// Broker terminal capabilities: market data feed + order gateway
pub mod bridge;
pub mod order_adapter;
pub mod paper;
pub mod retcode;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AccountInfo, Bar, BrokerPosition, FillPolicy, Side, SymbolSpec, Tick, Timeframe};
use crate::Result;

pub use bridge::BridgeGateway;
pub use order_adapter::OrderAdapter;
pub use paper::{PaperGateway, ScriptedResponse};

/// Price history source
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Last `count` bars, oldest first; the final bar is still forming
    async fn get_history(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>>;

    /// Most recent completed bar; `None` on an empty read
    async fn get_latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Bar>>;
}

/// Order routing and account state
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn account_info(&self) -> Result<AccountInfo>;

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolSpec>;

    async fn tick(&self, symbol: &str) -> Result<Tick>;

    /// Dry-run validation by the terminal
    async fn check(&self, request: &OrderRequest) -> Result<CheckResult>;

    /// `None` is the terminal's null result (request never reached the server)
    async fn submit(&self, request: &OrderRequest) -> Result<Option<OrderResult>>;

    async fn positions_for(&self, symbol: &str) -> Result<Vec<BrokerPosition>>;

    async fn close_all(&self, symbol: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderTime {
    Gtc,
    #[default]
    Day,
}

/// Market deal request as sent to the terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub volume: f64,
    pub side: Side,
    pub price: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub deviation: u32,
    pub magic: u64,
    pub comment: String,
    pub type_time: OrderTime,
    pub type_filling: FillPolicy,
    /// Ticket of the position being closed
    pub position: Option<u64>,
    pub tag: Uuid,
}

/// Terminal answer to `submit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub retcode: u32,
    #[serde(default)]
    pub deal: u64,
    #[serde(default)]
    pub order: u64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub comment: String,
}

/// Terminal answer to `check`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub retcode: u32,
    #[serde(default)]
    pub comment: String,
}

impl CheckResult {
    pub fn ok() -> Self {
        Self {
            retcode: retcode::CHECK_OK,
            comment: "Done".to_string(),
        }
    }

    pub fn passed(&self) -> bool {
        retcode::check_passed(self.retcode)
    }
}
