use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Bar period, keyed by the deployment file's timeframe codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "t1")]
    M1,
    #[serde(rename = "t5")]
    M5,
    #[serde(rename = "t15")]
    M15,
    #[serde(rename = "t30")]
    M30,
    #[serde(rename = "h1")]
    H1,
    #[serde(rename = "h4")]
    H4,
    #[serde(rename = "d1")]
    D1,
}

impl Timeframe {
    pub const CODES: [&'static str; 7] = ["t1", "t5", "t15", "t30", "h1", "h4", "d1"];

    pub fn code(&self) -> &'static str {
        match self {
            Self::M1 => "t1",
            Self::M5 => "t5",
            Self::M15 => "t15",
            Self::M30 => "t30",
            Self::H1 => "h1",
            Self::H4 => "h4",
            Self::D1 => "d1",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::H4 => 240,
            Self::D1 => 1440,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    /// Start of the bar period containing `time`
    pub fn bucket_start(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.minutes() * 60;
        let ts = time.timestamp();
        let start = ts - ts.rem_euclid(secs);
        DateTime::from_timestamp(start, 0).unwrap_or(time)
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "t1" => Ok(Self::M1),
            "t5" => Ok(Self::M5),
            "t15" => Ok(Self::M15),
            "t30" => Ok(Self::M30),
            "h1" => Ok(Self::H1),
            "h4" => Ok(Self::H4),
            "d1" => Ok(Self::D1),
            other => Err(format!(
                "unsupported timeframe `{}` (valid: {})",
                other,
                Self::CODES.join(", ")
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One OHLC price sample for a fixed interval, as reported by the terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: u64,
    pub spread: i64,
    pub volume: u64,
}

/// Directional trading intent produced by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    Short,
    Flat,
    Long,
}

impl Signal {
    pub fn from_value(value: i8) -> Option<Self> {
        match value {
            -1 => Some(Self::Short),
            0 => Some(Self::Flat),
            1 => Some(Self::Long),
            _ => None,
        }
    }

    pub fn value(&self) -> i8 {
        match self {
            Self::Short => -1,
            Self::Flat => 0,
            Self::Long => 1,
        }
    }

    /// Order side that opens a position in this direction
    pub fn open_side(&self) -> Option<Side> {
        match self {
            Self::Long => Some(Side::Buy),
            Self::Short => Some(Side::Sell),
            Self::Flat => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short => write!(f, "SHORT"),
            Self::Flat => write!(f, "FLAT"),
            Self::Long => write!(f, "LONG"),
        }
    }
}

/// Which signal directions a strategy may emit during an hour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PositionType {
    Long,
    Short,
    #[default]
    Both,
}

impl PositionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
            Self::Both => "both",
        }
    }
}

impl FromStr for PositionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "invalid position_type `{}` (valid: long, short, both)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Direction held after this side opens a position
    pub fn direction(&self) -> Signal {
        match self {
            Self::Buy => Signal::Long,
            Self::Sell => Signal::Short,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order filling policy supported by the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FillPolicy {
    Fok,
    Ioc,
    #[default]
    Return,
}

/// Current best quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
    pub time: DateTime<Utc>,
}

/// Trading constraints of an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub symbol: String,
    pub digits: u32,
    /// Minimal price change; 0 means "use digits only"
    pub tick_size: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    pub filling_modes: Vec<FillPolicy>,
    pub trade_allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: u64,
    pub balance: f64,
    pub equity: f64,
    pub profit: f64,
    pub currency: String,
}

/// Open position as reported by the terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price_open: f64,
    pub sl: f64,
    pub tp: f64,
    pub magic: u64,
    pub profit: f64,
}

/// The single position this engine holds for its instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub side: Side,
    pub open_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub volume: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn direction(&self) -> Signal {
        self.side.direction()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentKind {
    Open,
    Close,
}

/// A desired order action, not yet confirmed by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub kind: IntentKind,
    pub side: Side,
    pub volume: f64,
    /// None means "market, at the current quote"
    pub price: Option<f64>,
    /// Stop-loss distance in price points from the fill price
    pub sl_points: Option<f64>,
    /// Take-profit distance in price points from the fill price
    pub tp_points: Option<f64>,
    pub filling: FillPolicy,
    pub position_ticket: Option<u64>,
    pub comment: String,
    pub tag: Uuid,
}

impl OrderIntent {
    pub fn open(side: Side, volume: f64, sl_points: f64, tp_points: f64) -> Self {
        Self {
            kind: IntentKind::Open,
            side,
            volume,
            price: None,
            sl_points: Some(sl_points),
            tp_points: Some(tp_points),
            filling: FillPolicy::default(),
            position_ticket: None,
            comment: String::new(),
            tag: Uuid::new_v4(),
        }
    }

    /// Close `position` by trading the opposite side with its ticket attached
    pub fn close(position_side: Side, volume: f64, ticket: u64) -> Self {
        Self {
            kind: IntentKind::Close,
            side: position_side.opposite(),
            volume,
            price: None,
            sl_points: None,
            tp_points: None,
            filling: FillPolicy::default(),
            position_ticket: Some(ticket),
            comment: String::new(),
            tag: Uuid::new_v4(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_filling(mut self, filling: FillPolicy) -> Self {
        self.filling = filling;
        self
    }
}

/// How a rejection should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionClass {
    /// Stale price or requote: safe to retry once with a fresh quote
    Transient,
    /// Invalid fill mode, stops, volume: operator attention, never retried
    Configuration,
    /// Market closed, trading disabled, no money: terminal for this attempt
    Environment,
}

/// The gateway's classified response to a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderOutcome {
    Accepted {
        ticket: u64,
        price: f64,
        volume: f64,
        retcode: u32,
    },
    Rejected {
        retcode: u32,
        class: RejectionClass,
        comment: String,
    },
    GatewayError {
        message: String,
    },
}

impl OrderOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Executed fill, recorded in the trade ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub kind: IntentKind,
    pub side: Side,
    pub price: f64,
    pub volume: f64,
    pub ticket: u64,
    pub timestamp: DateTime<Utc>,
}
