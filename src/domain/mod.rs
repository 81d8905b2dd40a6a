//! Core domain types and simulation logic.

pub mod backtest;
pub mod bar;
pub mod config_validation;
pub mod error;
pub mod execution;
pub mod indicator;
pub mod instrument;
pub mod metrics;
pub mod portfolio;
pub mod position;
pub mod rule;
pub mod rule_eval;
pub mod rule_parser;
pub mod signal;
pub mod sizing;
pub mod strategy;
