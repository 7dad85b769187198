//! Position sizing
//!
//! Pure risk-based sizing: the amount is chosen so that a stop-out loses
//! `risk_per_trade` of capital, then capped so the position's notional
//! fits inside the remaining portfolio exposure budget.
//!
//! ```text
//! size = (capital * risk_per_trade) / |entry - stop|
//! ```
//!
//! The formula is currency-agnostic: capital and prices only need to
//! share a denomination.

use crate::error::TradeError;

/// Sizing parameters, decoupled from the global config so backtests can
/// run many sizers side by side.
#[derive(Debug, Clone)]
pub struct SizerParams {
    /// Fraction of capital risked per trade
    pub risk_per_trade: f64,
    /// Cap on total open notional as a fraction of capital
    pub max_exposure: f64,
    /// Exchange minimum order increment; final size is floored to it
    pub lot_size: f64,
    /// Exchange minimum order value (dust guard)
    pub min_notional: f64,
}

impl SizerParams {
    pub fn from_config(cfg: &crate::Config) -> Self {
        SizerParams {
            risk_per_trade: cfg.trading.risk_per_trade,
            max_exposure: cfg.trading.max_portfolio_exposure,
            lot_size: cfg.exchange.lot_size,
            min_notional: cfg.exchange.min_notional,
        }
    }
}

/// Compute the order amount in base-currency units.
///
/// No side effects; a pure function of its inputs. `open_notional` is the
/// sum of entry notional across currently open positions.
pub fn position_size(
    capital: f64,
    entry_price: f64,
    stop_price: f64,
    open_notional: f64,
    params: &SizerParams,
) -> Result<f64, TradeError> {
    let per_unit_risk = (entry_price - stop_price).abs();
    if !per_unit_risk.is_finite() || per_unit_risk <= 0.0 {
        return Err(TradeError::InvalidStopDistance {
            entry: entry_price,
            stop: stop_price,
        });
    }

    let risk_amount = capital * params.risk_per_trade;
    let raw_size = risk_amount / per_unit_risk;

    // Cap so the position fits in what is left of the exposure budget
    let exposure_budget = params.max_exposure * capital - open_notional;
    if exposure_budget <= 0.0 {
        return Err(TradeError::ExposureLimitExceeded(format!(
            "open notional {:.2} already at {:.0}% cap",
            open_notional,
            params.max_exposure * 100.0
        )));
    }
    let capped = raw_size.min(exposure_budget / entry_price);

    let size = round_to_lot(capped, params.lot_size);
    if size <= 0.0 {
        return Err(TradeError::ExposureLimitExceeded(format!(
            "remaining budget {:.2} sizes below one lot",
            exposure_budget
        )));
    }

    let notional = size * entry_price;
    if notional > capital {
        return Err(TradeError::InsufficientCapital {
            needed: notional,
            available: capital,
        });
    }
    if notional < params.min_notional {
        return Err(TradeError::InsufficientCapital {
            needed: params.min_notional,
            available: notional,
        });
    }

    Ok(size)
}

/// Floor to the exchange lot increment. The epsilon absorbs float
/// residue so an exact multiple of the lot is not rounded down a lot.
pub fn round_to_lot(size: f64, lot_size: f64) -> f64 {
    if lot_size <= 0.0 {
        return size;
    }
    (size / lot_size + 1e-9).floor() * lot_size
}
