//! CLI subcommand implementations

pub mod backtest;
pub mod download;
pub mod live;
