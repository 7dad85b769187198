//! Backtest command implementation

use anyhow::Result;
use rayon::prelude::*;
use std::path::Path;
use tracing::info;

use tradebot::backtest::{BacktestReport, Backtester};
use tradebot::strategies;
use tradebot::{data, Config};

pub fn run(
    config_path: String,
    strategy_override: Option<String>,
    capital_override: Option<f64>,
    compare: bool,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(strategy) = strategy_override {
        info!("Overriding strategy to: {}", strategy);
        config.strategy_name = strategy;
    }
    if let Some(capital) = capital_override {
        info!("Overriding initial capital to: ${:.2}", capital);
        config.trading.initial_capital = capital;
    }

    let symbols = config.trading.symbols();
    let timeframe = config.trading.timeframe.clone();

    let missing = data::find_missing_data(&config.backtest.data_dir, &symbols, &timeframe);
    if !missing.is_empty() {
        let files: Vec<String> = missing
            .iter()
            .map(|s| {
                data::candle_file(&config.backtest.data_dir, s, &timeframe)
                    .display()
                    .to_string()
            })
            .collect();
        anyhow::bail!(
            "Missing candle data:\n  {}\nFetch it first: tradebot download --symbols {} --timeframes {}",
            files.join("\n  "),
            missing
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(","),
            timeframe
        );
    }

    let candle_data = data::load_multi_symbol(&config.backtest.data_dir, &symbols, &timeframe)?;
    info!("Loaded data for {} symbols", candle_data.len());

    if compare {
        return run_comparison(&config, candle_data);
    }

    let report = Backtester::new(config.clone()).run(candle_data)?;
    print_report(&config, &report);
    export_results(&config, &report)?;

    if let Some(error) = &report.error {
        anyhow::bail!("Backtest aborted early: {}", error);
    }
    info!("Backtest completed successfully");
    Ok(())
}

/// Run every registered strategy over the same data in parallel and
/// rank the results.
fn run_comparison(
    config: &Config,
    candle_data: std::collections::HashMap<tradebot::Symbol, Vec<tradebot::Candle>>,
) -> Result<()> {
    let names = strategies::available_strategies();

    let mut results: Vec<(&str, BacktestReport)> = names
        .par_iter()
        .map(|name| {
            let mut run_config = config.clone();
            run_config.strategy_name = name.to_string();
            // Per-strategy params rarely transfer; each run uses defaults
            run_config.strategy = serde_json::json!({});
            Backtester::new(run_config)
                .run(candle_data.clone())
                .map(|report| (*name, report))
        })
        .collect::<Result<_>>()?;

    results.sort_by(|a, b| {
        b.1.metrics
            .sharpe_ratio
            .partial_cmp(&a.1.metrics.sharpe_ratio)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    println!("\n{}", "=".repeat(78));
    println!("STRATEGY COMPARISON");
    println!("{}", "=".repeat(78));
    println!(
        "{:<12} {:>10} {:>8} {:>10} {:>10} {:>10} {:>8}",
        "strategy", "return%", "sharpe", "max_dd%", "win_rate%", "pf", "trades"
    );
    println!("{}", "-".repeat(78));
    for (name, report) in &results {
        let m = &report.metrics;
        println!(
            "{:<12} {:>10.2} {:>8.2} {:>10.2} {:>10.2} {:>10.2} {:>8}",
            name,
            m.total_return_pct,
            m.sharpe_ratio,
            m.max_drawdown_pct,
            m.win_rate_pct,
            m.profit_factor,
            m.total_trades
        );
    }
    println!("{}", "=".repeat(78));
    Ok(())
}

fn print_report(config: &Config, report: &BacktestReport) {
    let m = &report.metrics;

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS - {}", config.strategy_name);
    println!("{}", "=".repeat(60));
    println!("Initial Capital:    ${:.2}", m.initial_capital);
    println!("Final Equity:       ${:.2}", m.final_capital);
    println!("Total Return:       {:.2}%", m.total_return_pct);
    println!("Annualized Return:  {:.2}%", m.annualized_return_pct);
    println!("Sharpe Ratio:       {:.2}", m.sharpe_ratio);
    println!("Sortino Ratio:      {:.2}", m.sortino_ratio);
    println!("Calmar Ratio:       {:.2}", m.calmar_ratio);
    println!("Max Drawdown:       {:.2}%", m.max_drawdown_pct);
    println!("Win Rate:           {:.2}%", m.win_rate_pct);
    println!("Profit Factor:      {:.2}", m.profit_factor);
    println!("Total Trades:       {}", m.total_trades);
    println!("Winning Trades:     {}", m.winning_trades);
    println!("Losing Trades:      {}", m.losing_trades);
    println!("Average Win:        ${:.2}", m.avg_win);
    println!("Average Loss:       ${:.2}", m.avg_loss);
    println!("Largest Win:        ${:.2}", m.largest_win);
    println!("Largest Loss:       ${:.2}", m.largest_loss);
    println!("Avg Hold:           {:.1}h", m.avg_holding_hours);
    println!("{}", "-".repeat(60));
    println!("Total Fees:         ${:.2}", m.total_fees);
    println!(
        "Signals:            {} ({} taken)",
        report.signals.len(),
        report.signals.iter().filter(|s| s.taken).count()
    );
    if let Some(error) = &report.error {
        println!("ABORTED:            {}", error);
    }
    println!("{}", "=".repeat(60));
}

/// Export trades and the equity curve as CSV into the results directory
fn export_results(config: &Config, report: &BacktestReport) -> Result<()> {
    let results_dir = Path::new(&config.backtest.results_dir);
    std::fs::create_dir_all(results_dir)?;

    let stamp = report
        .equity_curve
        .last()
        .map(|p| p.timestamp.format("%Y%m%d_%H%M%S").to_string())
        .unwrap_or_else(|| "empty".to_string());

    let trades_path = results_dir.join(format!(
        "backtest_trades_{}_{}.csv",
        config.strategy_name, stamp
    ));
    let mut writer = csv::Writer::from_path(&trades_path)?;
    for trade in &report.trades {
        writer.serialize(trade)?;
    }
    writer.flush()?;

    let equity_path = results_dir.join(format!(
        "backtest_equity_{}_{}.csv",
        config.strategy_name, stamp
    ));
    let mut writer = csv::Writer::from_path(&equity_path)?;
    for point in &report.equity_curve {
        writer.serialize(point)?;
    }
    writer.flush()?;

    info!(
        "Exported {} trades to {} and equity curve to {}",
        report.trades.len(),
        trades_path.display(),
        equity_path.display()
    );
    Ok(())
}
