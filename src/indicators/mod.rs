// Technical indicators module
// Per-bar series for RSI, SMA and Bollinger bands; `None` marks warm-up bars

pub mod bollinger;
pub mod moving_average;
pub mod rsi;

pub use bollinger::{calculate_bollinger, BollingerPoint};
pub use moving_average::{calculate_pct_change, calculate_sma, calculate_sma_series};
pub use rsi::calculate_rsi_series;
