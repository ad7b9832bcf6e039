// Library crate - bar aggregation, CVD trendline breakouts and position tracking

pub mod trades;
pub mod config;
pub mod bars;
pub mod window;
pub mod trendline;
pub mod filters;
pub mod position;
pub mod engine;
pub mod data;
pub mod streams;
pub mod report;

// Re-export commonly used types
pub use bars::{Bar, BarAggregator, CvdColor};
pub use config::{BarPolicy, ColorMode, ConfigError, FilterConfig, StrategyConfig};
pub use engine::{BarOutcome, BreakoutEngine, RunEnd};
pub use filters::{FilterOutcome, FilterStage, SignalFilterPipeline};
pub use position::{Direction, PositionEvent, PositionManager, PositionState, RunSummary};
pub use trades::{Side, Trade};
pub use trendline::{fit_trendlines, Breakout, TrendlineFit};
pub use window::RollingWindow;
