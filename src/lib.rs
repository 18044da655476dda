// Core modules
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod indicators;
pub mod models;
pub mod session;
pub mod strategy;

// Re-export commonly used types
pub use error::TraderError;
pub use models::*;
pub use strategy::SignalEvaluator;

// Error handling
pub type Result<T> = std::result::Result<T, TraderError>;
