// Order execution: bar history, position state, decisions and the trade ledger
pub mod bar_store;
pub mod executor;
pub mod ledger;
pub mod position_manager;
pub mod price_feed;

pub use bar_store::{BarStore, BarUpdate};
pub use executor::{DecisionContext, ExecutionAction, ExecutionDecision, Executor};
pub use ledger::{LedgerEntry, TradeLedger};
pub use position_manager::{ExitReason, PositionManager, Reconciliation};
pub use price_feed::PriceFeed;
