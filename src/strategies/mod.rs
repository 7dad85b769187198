//! Trading strategies
//!
//! Strategies are a capability the engine consumes: given candle
//! history, produce at most one discrete signal per evaluation. The
//! registry maps config names to factories so the selected strategy is
//! purely a configuration concern.

pub mod ema_scalp;
pub mod rsi_bb;
pub mod sma_cross;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::{Candle, Config, SignalKind, Symbol};

/// One strategy verdict for one evaluation tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategySignal {
    pub kind: SignalKind,
    /// Confidence in 0..1
    pub strength: f64,
}

impl StrategySignal {
    pub fn new(kind: SignalKind, strength: f64) -> Self {
        StrategySignal {
            kind,
            strength: strength.clamp(0.0, 1.0),
        }
    }
}

/// Contract every strategy implements
pub trait Strategy: Send + Sync {
    /// Identifier, matches the config's `strategy_name`
    fn name(&self) -> &'static str;

    /// Candle history needed before evaluation produces signals
    fn min_candles(&self) -> usize;

    /// Evaluate the latest candle in context. Returns `None` when no
    /// actionable setup exists this tick.
    fn evaluate(&self, symbol: &Symbol, candles: &[Candle]) -> Option<StrategySignal>;
}

/// Factory function type for creating strategies from config
pub type StrategyFactory = fn(&Config) -> Result<Box<dyn Strategy>>;

static REGISTRY: OnceLock<RwLock<HashMap<&'static str, StrategyFactory>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<&'static str, StrategyFactory>> {
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<&'static str, StrategyFactory> = HashMap::new();
        map.insert("sma_cross", sma_cross::create as StrategyFactory);
        map.insert("rsi_bb", rsi_bb::create as StrategyFactory);
        map.insert("ema_scalp", ema_scalp::create as StrategyFactory);
        RwLock::new(map)
    })
}

/// Create the strategy selected by the configuration
pub fn create_strategy(config: &Config) -> Result<Box<dyn Strategy>> {
    let registry = registry().read().unwrap();
    let factory = registry.get(config.strategy_name.as_str()).ok_or_else(|| {
        let mut available: Vec<_> = registry.keys().copied().collect();
        available.sort_unstable();
        anyhow::anyhow!(
            "Unknown strategy: '{}'. Available: {}",
            config.strategy_name,
            available.join(", ")
        )
    })?;
    factory(config)
}

/// Names of all registered strategies, sorted
pub fn available_strategies() -> Vec<&'static str> {
    let mut names: Vec<_> = registry().read().unwrap().keys().copied().collect();
    names.sort_unstable();
    names
}

/// Register an additional strategy (plugins, tests)
pub fn register_strategy(name: &'static str, factory: StrategyFactory) {
    registry().write().unwrap().insert(name, factory);
}
