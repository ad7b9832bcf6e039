//! Confirmation filters for raw trendline breakouts
//!
//! Stages run in a fixed order and can only demote a live signal to
//! [`Breakout::None`]:
//! 1. Reversal - same direction as the last accepted signal is rejected
//! 2. Slope - bullish needs rising resistance, bearish needs falling support
//! 3. Price - close must clear every prior close in the window
//! 4. Volume - volume must beat the mean of prior volumes in the window

use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::position::Direction;
use crate::trendline::{Breakout, TrendlineFit};
use crate::window::RollingWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterStage {
    Reversal,
    Slope,
    Price,
    Volume,
}

impl std::fmt::Display for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterStage::Reversal => write!(f, "reversal"),
            FilterStage::Slope => write!(f, "slope"),
            FilterStage::Price => write!(f, "price"),
            FilterStage::Volume => write!(f, "volume"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOutcome {
    /// Classification from the fitter
    pub raw: Breakout,
    /// Classification after all stages
    pub signal: Breakout,
    /// First stage that demoted the signal
    pub rejected_by: Option<FilterStage>,
}

pub fn passes_reversal(raw: Breakout, last_accepted: Option<Direction>) -> bool {
    match (Direction::from_breakout(raw), last_accepted) {
        (Some(dir), Some(last)) => dir != last,
        _ => true,
    }
}

pub fn passes_slope(raw: Breakout, fit: &TrendlineFit) -> bool {
    match raw {
        Breakout::Bullish => fit.resistance_slope > 0.0,
        Breakout::Bearish => fit.support_slope < 0.0,
        Breakout::None => true,
    }
}

pub fn passes_price(raw: Breakout, window: &RollingWindow) -> bool {
    let Some(close) = window.last_close() else {
        return false;
    };
    match raw {
        Breakout::Bullish => window
            .prior_closes()
            .reduce(f64::max)
            .is_some_and(|prior_max| close > prior_max),
        Breakout::Bearish => window
            .prior_closes()
            .reduce(f64::min)
            .is_some_and(|prior_min| close < prior_min),
        Breakout::None => true,
    }
}

pub fn passes_volume(raw: Breakout, window: &RollingWindow) -> bool {
    if !raw.is_signal() {
        return true;
    }
    let Some(volume) = window.last_volume() else {
        return false;
    };
    let prior: Vec<f64> = window.prior_volumes().collect();
    if prior.is_empty() {
        return false;
    }
    let mean = prior.iter().sum::<f64>() / prior.len() as f64;
    volume > mean
}

/// Ordered confirmation cascade
#[derive(Debug, Clone, Default)]
pub struct SignalFilterPipeline {
    config: FilterConfig,
}

impl SignalFilterPipeline {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Run every enabled stage against a raw classification.
    ///
    /// `last_accepted` is the reversal memory held by the position manager.
    pub fn evaluate(
        &self,
        raw: Breakout,
        fit: &TrendlineFit,
        window: &RollingWindow,
        last_accepted: Option<Direction>,
    ) -> FilterOutcome {
        let mut outcome = FilterOutcome {
            raw,
            signal: raw,
            rejected_by: None,
        };

        if self.config.reversal {
            outcome.apply(FilterStage::Reversal, passes_reversal(outcome.signal, last_accepted));
        }
        if self.config.slope {
            outcome.apply(FilterStage::Slope, passes_slope(outcome.signal, fit));
        }
        if self.config.price {
            outcome.apply(FilterStage::Price, passes_price(outcome.signal, window));
        }
        if self.config.volume {
            outcome.apply(FilterStage::Volume, passes_volume(outcome.signal, window));
        }

        outcome
    }
}

impl FilterOutcome {
    fn apply(&mut self, stage: FilterStage, passed: bool) {
        if self.signal.is_signal() && !passed {
            self.signal = Breakout::None;
            self.rejected_by.get_or_insert(stage);
        }
    }
}
