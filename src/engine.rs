//! Per-run orchestration: trades -> bars -> window -> fit -> filters -> position
//!
//! One [`BreakoutEngine`] holds all mutable state for a run (aggregator,
//! window, position manager), so independent runs never share anything.

use anyhow::Result;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::bars::{Bar, BarAggregator};
use crate::config::{ConfigError, StrategyConfig};
use crate::filters::{FilterOutcome, SignalFilterPipeline};
use crate::position::{PositionEvent, PositionManager, RunSummary};
use crate::trades::Trade;
use crate::trendline::{fit_trendlines, TrendlineFit};
use crate::window::RollingWindow;

/// Everything that happened while processing one finalized bar
#[derive(Debug, Clone, Serialize)]
pub struct BarOutcome {
    pub bar: Bar,
    pub fit: Option<TrendlineFit>,
    pub filter: Option<FilterOutcome>,
    pub event: Option<PositionEvent>,
}

/// How a streamed run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// Upstream stream was exhausted
    Completed,
    /// Cancellation was observed between bars
    Cancelled,
}

pub struct BreakoutEngine {
    config: StrategyConfig,
    aggregator: BarAggregator,
    window: RollingWindow,
    filters: SignalFilterPipeline,
    positions: PositionManager,
}

impl BreakoutEngine {
    pub fn new(config: StrategyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            aggregator: BarAggregator::new(config.bar_policy, config.color_mode)?,
            window: RollingWindow::new(config.window_size),
            filters: SignalFilterPipeline::new(config.filters),
            positions: PositionManager::new(config.reward_risk)?,
            config,
        })
    }

    /// Ignore trades for any other symbol
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.aggregator = self.aggregator.with_symbol(symbol);
        self
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn summary(&self) -> &RunSummary {
        self.positions.summary()
    }

    /// Running CVD over all trades processed so far
    pub fn cvd(&self) -> i64 {
        self.aggregator.cvd()
    }

    /// Feed one trade; returns the outcome of the bar it closed, if any
    pub fn process_trade(&mut self, trade: &Trade) -> Option<BarOutcome> {
        let bar = self.aggregator.process_trade(trade)?;
        Some(self.on_bar(bar))
    }

    /// Flush the open partial bar at stream end
    pub fn finish(&mut self) -> Option<BarOutcome> {
        let bar = self.aggregator.flush()?;
        Some(self.on_bar(bar))
    }

    /// Run one finalized bar through exits, the window, and entries.
    ///
    /// Exit and entry are never both evaluated for the same bar.
    pub fn on_bar(&mut self, bar: Bar) -> BarOutcome {
        info!(
            "{} | O:{:.2} H:{:.2} L:{:.2} C:{:.2} Vol:{} CVD:{} {}",
            bar.timestamp.format("%Y-%m-%d %H:%M:%S"),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            bar.cvd,
            bar.color
        );

        let was_flat = self.positions.is_flat();
        let exit = if was_flat {
            None
        } else {
            self.positions.check_exit(&bar)
        };

        self.window.push_bar(&bar);

        let mut outcome = BarOutcome {
            bar,
            fit: None,
            filter: None,
            event: exit,
        };

        if !was_flat || !self.window.is_full() {
            return outcome;
        }

        let Some(fit) = fit_trendlines(&self.window.cvd(), self.config.breakout_tolerance) else {
            debug!("Window not fittable, skipping");
            return outcome;
        };

        let filtered =
            self.filters
                .evaluate(fit.breakout, &fit, &self.window, self.positions.last_signal());
        if let Some(stage) = filtered.rejected_by {
            debug!("{} breakout rejected by {} filter", filtered.raw, stage);
        }

        outcome.event = self
            .positions
            .try_enter(filtered.signal, &self.window, outcome.bar.timestamp);
        outcome.fit = Some(fit);
        outcome.filter = Some(filtered);
        outcome
    }

    /// Drive a lazy trade stream to completion.
    ///
    /// Cancellation is only checked after a bar has been finalized. On stream
    /// end, cancellation, or an upstream error, the open partial bar is
    /// flushed first; the error is then returned.
    pub async fn run_stream<S, F>(
        &mut self,
        trades: S,
        cancel: watch::Receiver<bool>,
        mut on_outcome: F,
    ) -> Result<RunEnd>
    where
        S: Stream<Item = Result<Trade>>,
        F: FnMut(&BarOutcome),
    {
        futures::pin_mut!(trades);

        while let Some(next) = trades.next().await {
            let trade = match next {
                Ok(trade) => trade,
                Err(e) => {
                    if let Some(outcome) = self.finish() {
                        on_outcome(&outcome);
                    }
                    return Err(e.context("Trade stream failed"));
                }
            };

            if let Some(outcome) = self.process_trade(&trade) {
                on_outcome(&outcome);
                if *cancel.borrow() {
                    info!("Cancellation requested, stopping between bars");
                    if let Some(outcome) = self.finish() {
                        on_outcome(&outcome);
                    }
                    return Ok(RunEnd::Cancelled);
                }
            }
        }

        if let Some(outcome) = self.finish() {
            on_outcome(&outcome);
        }
        Ok(RunEnd::Completed)
    }
}
