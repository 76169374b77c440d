// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod sentiment;
pub mod strategy;

// Re-export commonly used types
pub use crate::config::Settings;
pub use error::BotError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
