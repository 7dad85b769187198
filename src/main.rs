//! tradebot - automated crypto trading, main entry point
//!
//! Three subcommands:
//! - backtest: replay a strategy over historical candles
//! - live: paper trading against live market data
//! - download: fetch historical candles from Binance

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "tradebot")]
#[command(about = "Automated crypto trading bot with risk management, backtesting, and paper trading", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a strategy backtest over stored candle data
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Strategy name (overrides config file)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Initial capital (overrides config file)
        #[arg(long)]
        capital: Option<f64>,

        /// Run every registered strategy and rank the results
        #[arg(long)]
        compare: bool,
    },

    /// Run paper trading against live market data
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Cycle interval in seconds
        #[arg(long, default_value = "300")]
        interval: u64,

        /// Clear a sticky kill-switch halt from a previous session
        #[arg(long)]
        reset_kill_switch: bool,
    },

    /// Download historical candles from Binance
    Download {
        /// Symbols (comma-separated). E.g., "BTC,ETH,SOL" or "BTCUSDT"
        #[arg(short, long, default_value = "BTC,ETH,SOL")]
        symbols: String,

        /// Timeframe intervals (comma-separated). E.g., "1h,4h,1d"
        #[arg(short, long, default_value = "1h,4h,1d")]
        timeframes: String,

        /// Days of history to fetch
        #[arg(short, long, default_value = "180")]
        days: u32,

        /// Output directory
        #[arg(short, long, default_value = "data")]
        output: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy HTTP internals
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Backtest { .. } => "backtest",
        Commands::Live { .. } => "live",
        Commands::Download { .. } => "download",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Backtest {
            config,
            strategy,
            capital,
            compare,
        } => commands::backtest::run(config, strategy, capital, compare),

        Commands::Live {
            config,
            interval,
            reset_kill_switch,
        } => commands::live::run(config, interval, reset_kill_switch),

        Commands::Download {
            symbols,
            timeframes,
            days,
            output,
        } => commands::download::run(symbols, timeframes, days, output),
    }
}
