//! Strategy configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected configuration, raised when a component is constructed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("window size must be at least 2, got {0}")]
    WindowTooSmall(usize),
    #[error("tick count per bar must be positive")]
    ZeroTickCount,
    #[error("time bucket granularity must be positive, got {0} ms")]
    NonPositiveGranularity(i64),
    #[error("reward:risk multiple must be positive and finite, got {0}")]
    InvalidRewardRisk(f64),
    #[error("breakout tolerance must be non-negative and finite, got {0}")]
    InvalidTolerance(f64),
}

/// How trades are segmented into bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarPolicy {
    /// Close a bar after this many trades
    TickCount(usize),
    /// Close a bar when the truncated timestamp bucket changes (granularity in ms)
    TimeBucket(i64),
}

impl BarPolicy {
    pub fn seconds(secs: i64) -> Self {
        BarPolicy::TimeBucket(secs * 1000)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            BarPolicy::TickCount(0) => Err(ConfigError::ZeroTickCount),
            BarPolicy::TimeBucket(ms) if ms <= 0 => Err(ConfigError::NonPositiveGranularity(ms)),
            _ => Ok(()),
        }
    }
}

impl Default for BarPolicy {
    fn default() -> Self {
        // 1-minute bars
        BarPolicy::TimeBucket(60_000)
    }
}

impl std::fmt::Display for BarPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BarPolicy::TickCount(n) => write!(f, "{}-tick", n),
            BarPolicy::TimeBucket(ms) if ms % 1000 == 0 => write!(f, "{}s", ms / 1000),
            BarPolicy::TimeBucket(ms) => write!(f, "{}ms", ms),
        }
    }
}

/// CVD color classification mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// Close vs previous bar's high/low
    #[default]
    Strong,
    /// Close vs own open
    Weak,
}

/// Per-stage switches for the confirmation filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub reversal: bool,
    pub slope: bool,
    pub price: bool,
    pub volume: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            reversal: true,
            slope: true,
            price: true,
            volume: true,
        }
    }
}

/// Full configuration surface for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Bar segmentation policy
    pub bar_policy: BarPolicy,

    /// Number of finalized bars in the trendline window
    pub window_size: usize,

    /// Breakout tolerance as a fraction of the resistance level (0.001 = 0.1%)
    pub breakout_tolerance: f64,

    /// Target distance as a multiple of stop distance
    pub reward_risk: f64,

    /// CVD color mode
    pub color_mode: ColorMode,

    /// Confirmation filter switches
    pub filters: FilterConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            bar_policy: BarPolicy::default(),
            window_size: 5,
            breakout_tolerance: 0.001,
            reward_risk: 2.0,
            color_mode: ColorMode::Strong,
            filters: FilterConfig::default(),
        }
    }
}

impl StrategyConfig {
    /// Check every parameter, failing on the first bad one
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bar_policy.validate()?;
        if self.window_size < 2 {
            return Err(ConfigError::WindowTooSmall(self.window_size));
        }
        if !self.breakout_tolerance.is_finite() || self.breakout_tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(self.breakout_tolerance));
        }
        validate_reward_risk(self.reward_risk)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn validate_reward_risk(r: f64) -> Result<(), ConfigError> {
    if r.is_finite() && r > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidRewardRisk(r))
    }
}
