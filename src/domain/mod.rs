//! Core domain types and logic.

pub mod accounting;
pub mod backtest;
pub mod calendar;
pub mod config_validation;
pub mod construction;
pub mod data_quality;
pub mod error;
pub mod metrics;
pub mod overlap;
pub mod prices;
pub mod selection;
pub mod signal;
pub mod universe;
pub mod vintage;
