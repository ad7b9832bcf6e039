//! Bar aggregation with running cumulative volume delta
//!
//! Trades are grouped into bars under a [`BarPolicy`]:
//! - `TickCount(n)` closes a bar as soon as its n-th trade arrives
//! - `TimeBucket(ms)` closes a bar when a trade lands in a later bucket
//!
//! Running CVD lives on the aggregator and never resets across bars. Whatever
//! bar is still open when the stream ends is returned by [`BarAggregator::flush`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{BarPolicy, ColorMode, ConfigError};
use crate::trades::{Side, Trade};

/// CVD color of a finalized bar (display only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CvdColor {
    Green,
    Red,
    Gray,
}

impl std::fmt::Display for CvdColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CvdColor::Green => write!(f, "GREEN"),
            CvdColor::Red => write!(f, "RED"),
            CvdColor::Gray => write!(f, "GRAY"),
        }
    }
}

/// Finalized OHLCV bar with delta and CVD snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time: first trade for tick bars, bucket start for time bars
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub buy_volume: u64,
    pub sell_volume: u64,
    /// Signed volume traded inside this bar
    pub delta: i64,
    /// Running CVD at the bar's last trade
    pub cvd: i64,
    pub trade_count: u64,
    pub vwap: f64,
    pub color: CvdColor,
    pub symbol: String,
}

struct BarBuilder {
    timestamp: DateTime<Utc>,
    bucket: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    buy_volume: u64,
    sell_volume: u64,
    delta: i64,
    cvd: i64,
    trade_count: u64,
    notional: f64,
    symbol: String,
}

impl BarBuilder {
    fn new(timestamp: DateTime<Utc>, bucket: i64, trade: &Trade) -> Self {
        Self {
            timestamp,
            bucket,
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: 0,
            buy_volume: 0,
            sell_volume: 0,
            delta: 0,
            cvd: 0,
            trade_count: 0,
            notional: 0.0,
            symbol: trade.symbol.clone(),
        }
    }

    fn add_trade(&mut self, trade: &Trade, running_cvd: i64) {
        self.high = self.high.max(trade.price);
        self.low = self.low.min(trade.price);
        self.close = trade.price;
        self.volume += trade.size;
        match trade.side {
            Side::Buy => self.buy_volume += trade.size,
            Side::Sell => self.sell_volume += trade.size,
            Side::None => {}
        }
        self.delta += trade.delta();
        self.cvd = running_cvd;
        self.trade_count += 1;
        self.notional += trade.price * trade.size as f64;
    }

    fn finish(self, color: CvdColor) -> Bar {
        let vwap = if self.volume > 0 {
            self.notional / self.volume as f64
        } else {
            self.close
        };
        Bar {
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
            delta: self.delta,
            cvd: self.cvd,
            trade_count: self.trade_count,
            vwap,
            color,
            symbol: self.symbol,
        }
    }
}

/// Classify a bar's CVD color.
///
/// Strong mode compares the close against the previous finalized bar's range
/// and falls back to close-vs-open when there is no previous bar.
pub fn cvd_color(
    open: f64,
    close: f64,
    prev_range: Option<(f64, f64)>,
    mode: ColorMode,
) -> CvdColor {
    match (mode, prev_range) {
        (ColorMode::Strong, Some((prev_high, prev_low))) => {
            if close > prev_high {
                CvdColor::Green
            } else if close < prev_low {
                CvdColor::Red
            } else {
                CvdColor::Gray
            }
        }
        _ => {
            if close > open {
                CvdColor::Green
            } else if close < open {
                CvdColor::Red
            } else {
                CvdColor::Gray
            }
        }
    }
}

/// Turns an ordered trade stream into finalized bars
pub struct BarAggregator {
    policy: BarPolicy,
    color_mode: ColorMode,
    symbol: Option<String>,
    running_cvd: i64,
    current_bar: Option<BarBuilder>,
    prev_range: Option<(f64, f64)>,
    bars_emitted: u64,
}

impl BarAggregator {
    /// Create an aggregator; fails on a zero tick count or non-positive granularity
    pub fn new(policy: BarPolicy, color_mode: ColorMode) -> Result<Self, ConfigError> {
        policy.validate()?;
        Ok(Self {
            policy,
            color_mode,
            symbol: None,
            running_cvd: 0,
            current_bar: None,
            prev_range: None,
            bars_emitted: 0,
        })
    }

    /// Only accept trades for this symbol (others are ignored)
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn policy(&self) -> BarPolicy {
        self.policy
    }

    /// Running CVD over every trade seen so far
    pub fn cvd(&self) -> i64 {
        self.running_cvd
    }

    pub fn has_open_bar(&self) -> bool {
        self.current_bar.is_some()
    }

    pub fn bars_emitted(&self) -> u64 {
        self.bars_emitted
    }

    fn bucket_of(&self, ts: DateTime<Utc>) -> i64 {
        match self.policy {
            BarPolicy::TimeBucket(ms) => ts.timestamp_millis().div_euclid(ms) * ms,
            BarPolicy::TickCount(_) => 0,
        }
    }

    fn close_current(&mut self) -> Option<Bar> {
        let builder = self.current_bar.take()?;
        let color = cvd_color(builder.open, builder.close, self.prev_range, self.color_mode);
        let bar = builder.finish(color);
        self.prev_range = Some((bar.high, bar.low));
        self.bars_emitted += 1;
        debug!(
            "Bar closed: {} trades={} vol={} delta={} cvd={}",
            bar.timestamp, bar.trade_count, bar.volume, bar.delta, bar.cvd
        );
        Some(bar)
    }

    /// Process a trade and return the bar it finalized, if any
    pub fn process_trade(&mut self, trade: &Trade) -> Option<Bar> {
        if let Some(symbol) = &self.symbol {
            if &trade.symbol != symbol {
                return None;
            }
        }

        self.running_cvd += trade.delta();
        let bucket = self.bucket_of(trade.ts_event);

        match self.policy {
            BarPolicy::TickCount(n) => {
                let running_cvd = self.running_cvd;
                let bar = self
                    .current_bar
                    .get_or_insert_with(|| BarBuilder::new(trade.ts_event, 0, trade));
                bar.add_trade(trade, running_cvd);
                if bar.trade_count as usize >= n {
                    self.close_current()
                } else {
                    None
                }
            }
            BarPolicy::TimeBucket(_) => {
                let bucket_changed = self
                    .current_bar
                    .as_ref()
                    .is_some_and(|bar| bar.bucket != bucket);
                let completed = if bucket_changed { self.close_current() } else { None };
                let running_cvd = self.running_cvd;
                let bar = self.current_bar.get_or_insert_with(|| {
                    let open_time =
                        DateTime::<Utc>::from_timestamp_millis(bucket).unwrap_or(trade.ts_event);
                    BarBuilder::new(open_time, bucket, trade)
                });
                bar.add_trade(trade, running_cvd);
                completed
            }
        }
    }

    /// Finalize the open partial bar at stream end
    pub fn flush(&mut self) -> Option<Bar> {
        self.close_current()
    }
}
