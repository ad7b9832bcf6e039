//! Constrained trendline fitting over a CVD window
//!
//! Fits a support line (never above any point) and a resistance line (never
//! below any point) to a short series, each anchored through one pivot, then
//! classifies whether the latest value is breaking out of the channel.
//!
//! The slope search is a step-halving local search. A candidate slope that
//! violates the one-sided constraint is scored [`LineScore::Infeasible`],
//! which always loses against any feasible squared error.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Allowed constraint violation before a line counts as crossing the series
pub const FEASIBILITY_EPS: f64 = 1e-5;

/// Search stops once the step falls below this many slope units
const MIN_STEP: f64 = 1e-4;

/// Breakout classification of the latest window value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breakout {
    Bullish,
    Bearish,
    None,
}

impl Breakout {
    pub fn is_signal(self) -> bool {
        self != Breakout::None
    }
}

impl std::fmt::Display for Breakout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Breakout::Bullish => write!(f, "BULLISH"),
            Breakout::Bearish => write!(f, "BEARISH"),
            Breakout::None => write!(f, "NONE"),
        }
    }
}

/// Score of a candidate line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineScore {
    /// Sum of squared deviations from the series
    Feasible { score: f64 },
    /// Line crosses the series on the wrong side
    Infeasible,
}

impl LineScore {
    /// Strictly better than `other`. Infeasible is never better than anything.
    pub fn is_better_than(&self, other: &LineScore) -> bool {
        match (self, other) {
            (LineScore::Feasible { score: a }, LineScore::Feasible { score: b }) => a < b,
            (LineScore::Feasible { .. }, LineScore::Infeasible) => true,
            (LineScore::Infeasible, _) => false,
        }
    }

    pub fn is_feasible(&self) -> bool {
        matches!(self, LineScore::Feasible { .. })
    }
}

/// Result of fitting both bounds to one window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendlineFit {
    pub support_line: Vec<f64>,
    pub resistance_line: Vec<f64>,
    pub support_slope: f64,
    pub resistance_slope: f64,
    pub support_pivot: usize,
    pub resistance_pivot: usize,
    pub breakout: Breakout,
}

/// Ordinary least squares of `y` against its index: (slope, intercept)
pub fn least_squares(y: &[f64]) -> (f64, f64) {
    let n = y.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = y.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &v) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (v - y_mean);
        sxx += dx * dx;
    }

    if sxx == 0.0 {
        return (0.0, y_mean);
    }
    let slope = sxy / sxx;
    (slope, y_mean - slope * x_mean)
}

/// Score a line of `slope` through `(pivot, y[pivot])`
pub fn check_trend_line(support: bool, pivot: usize, slope: f64, y: &[f64]) -> LineScore {
    let intercept = -slope * pivot as f64 + y[pivot];
    let mut sum_sq = 0.0;

    for (i, &v) in y.iter().enumerate() {
        let diff = slope * i as f64 + intercept - v;
        if support && diff > FEASIBILITY_EPS {
            return LineScore::Infeasible;
        }
        if !support && diff < -FEASIBILITY_EPS {
            return LineScore::Infeasible;
        }
        sum_sq += diff * diff;
    }

    if sum_sq.is_finite() {
        LineScore::Feasible { score: sum_sq }
    } else {
        LineScore::Infeasible
    }
}

/// Search for the best feasible slope through `y[pivot]`, starting at `init_slope`.
///
/// Returns `(slope, intercept)`; the intercept always puts the line exactly
/// through the pivot. Gives up after `20 * K` iterations or `5 * K`
/// consecutive misses and returns the best line found so far.
pub fn optimize_slope(support: bool, pivot: usize, init_slope: f64, y: &[f64]) -> (f64, f64) {
    let k = y.len();
    let (lo, hi) = y
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let slope_unit = (hi - lo) / k as f64;

    let max_iterations = 20 * k;
    let max_misses = 5 * k;

    let mut opt_step = 1.0;
    let mut best_slope = init_slope;
    let mut best = check_trend_line(support, pivot, best_slope, y);
    let mut get_derivative = true;
    let mut derivative = 0.0;
    let mut iterations = 0;
    let mut misses = 0;

    while opt_step > MIN_STEP {
        if iterations >= max_iterations || misses >= max_misses {
            debug!(
                "Slope search bailed out: support={} pivot={} iterations={} misses={}",
                support, pivot, iterations, misses
            );
            break;
        }
        iterations += 1;

        if get_derivative {
            derivative = probe_derivative(support, pivot, best_slope, &best, slope_unit, y);
            get_derivative = false;
        }

        let trial = if derivative > 0.0 {
            best_slope - slope_unit * opt_step
        } else {
            best_slope + slope_unit * opt_step
        };

        let score = check_trend_line(support, pivot, trial, y);
        if score.is_better_than(&best) {
            best_slope = trial;
            best = score;
            get_derivative = true;
            misses = 0;
        } else {
            opt_step *= 0.5;
            misses += 1;
        }
    }

    let intercept = -best_slope * pivot as f64 + y[pivot];
    (best_slope, intercept)
}

/// Sign of d(score)/d(slope) from a one-minimum-step probe.
///
/// Probes upward first and retries downward when the upward probe is
/// infeasible. Returns 0 when no feasible comparison exists, which makes the
/// search step upward.
fn probe_derivative(
    support: bool,
    pivot: usize,
    slope: f64,
    current: &LineScore,
    slope_unit: f64,
    y: &[f64],
) -> f64 {
    let LineScore::Feasible { score: base } = *current else {
        return 0.0;
    };

    let delta = slope_unit * MIN_STEP;
    if let LineScore::Feasible { score } = check_trend_line(support, pivot, slope + delta, y) {
        return score - base;
    }
    if let LineScore::Feasible { score } = check_trend_line(support, pivot, slope - delta, y) {
        return base - score;
    }
    0.0
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v < values[best] {
            best = i;
        }
    }
    best
}

/// Fit support and resistance to `y` and classify the latest value.
///
/// Returns `None` for windows shorter than 2 or containing non-finite values.
/// `tolerance` is a fraction of the resistance level at the last index.
pub fn fit_trendlines(y: &[f64], tolerance: f64) -> Option<TrendlineFit> {
    if y.len() < 2 || y.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let (seed_slope, _) = least_squares(y);
    let residuals: Vec<f64> = y
        .iter()
        .enumerate()
        .map(|(i, &v)| v - seed_slope * i as f64)
        .collect();

    let resistance_pivot = argmax(&residuals);
    let support_pivot = argmin(&residuals);

    let (support_slope, support_intercept) = optimize_slope(true, support_pivot, seed_slope, y);
    let (resistance_slope, resistance_intercept) =
        optimize_slope(false, resistance_pivot, seed_slope, y);

    let line = |slope: f64, intercept: f64| -> Vec<f64> {
        (0..y.len()).map(|i| slope * i as f64 + intercept).collect()
    };
    let support_line = line(support_slope, support_intercept);
    let resistance_line = line(resistance_slope, resistance_intercept);

    let last = y.len() - 1;
    let breakout = classify_breakout(y[last], support_line[last], resistance_line[last], tolerance);

    Some(TrendlineFit {
        support_line,
        resistance_line,
        support_slope,
        resistance_slope,
        support_pivot,
        resistance_pivot,
        breakout,
    })
}

/// Bullish is checked before bearish when both hold.
pub fn classify_breakout(last: f64, support: f64, resistance: f64, tolerance: f64) -> Breakout {
    let tol = resistance.abs() * tolerance;
    if last >= resistance - tol {
        Breakout::Bullish
    } else if last <= support + tol {
        Breakout::Bearish
    } else {
        Breakout::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bounds(y: &[f64], fit: &TrendlineFit) {
        for (i, &v) in y.iter().enumerate() {
            assert!(v - fit.support_line[i] >= -FEASIBILITY_EPS, "support above point {}", i);
            assert!(v - fit.resistance_line[i] <= FEASIBILITY_EPS, "resistance below point {}", i);
        }
    }

    #[test]
    fn test_score_ordering() {
        let feasible = LineScore::Feasible { score: 1e9 };
        let better = LineScore::Feasible { score: 1.0 };
        assert!(feasible.is_better_than(&LineScore::Infeasible));
        assert!(!LineScore::Infeasible.is_better_than(&feasible));
        assert!(!LineScore::Infeasible.is_better_than(&LineScore::Infeasible));
        assert!(better.is_better_than(&feasible));
        assert!(!feasible.is_better_than(&feasible));
    }

    #[test]
    fn test_least_squares() {
        let (slope, intercept) = least_squares(&[1.0, 3.0, 5.0, 7.0]);
        assert!((slope - 2.0).abs() < 1e-12);
        assert!((intercept - 1.0).abs() < 1e-12);

        let (slope, _) = least_squares(&[10.0, 12.0, 9.0, 14.0, 20.0]);
        assert!((slope - 2.2).abs() < 1e-12);
    }

    #[test]
    fn test_check_trend_line() {
        let y = [1.0, 2.0, 1.0];
        // Flat line through the middle peak is a valid resistance, not a support
        assert!(check_trend_line(false, 1, 0.0, &y).is_feasible());
        assert_eq!(check_trend_line(true, 1, 0.0, &y), LineScore::Infeasible);
        assert_eq!(
            check_trend_line(true, 0, 0.0, &y),
            LineScore::Feasible { score: 0.0 + 1.0 + 0.0 }
        );
    }

    #[test]
    fn test_resistance_clipped_by_constraint() {
        let y = [10.0, 12.0, 9.0, 14.0, 20.0];
        let (slope, intercept) = optimize_slope(false, 4, 2.2, &y);
        // Unconstrained optimum is ~3.07; point 0 caps the slope at 2.5
        assert!(slope <= 2.5 + FEASIBILITY_EPS);
        assert!(slope > 2.49);
        assert!((slope * 4.0 + intercept - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_end_to_end_window_is_bullish() {
        let y = [10.0, 12.0, 9.0, 14.0, 20.0];
        let fit = fit_trendlines(&y, 0.001).unwrap();
        assert_eq!(fit.resistance_pivot, 4);
        assert_eq!(fit.support_pivot, 2);
        assert!((fit.resistance_line[4] - 20.0).abs() <= 20.0 * 0.001);
        assert!(fit.resistance_slope > 0.0);
        assert_eq!(fit.breakout, Breakout::Bullish);
        assert_bounds(&y, &fit);
    }

    #[test]
    fn test_bearish_breakdown() {
        let y = [20.0, 18.0, 21.0, 19.0, 5.0];
        let fit = fit_trendlines(&y, 0.001).unwrap();
        assert_eq!(fit.breakout, Breakout::Bearish);
        assert!(fit.support_slope < 0.0);
        assert_bounds(&y, &fit);
    }

    #[test]
    fn test_inside_channel_is_none() {
        let y = [0.0, 10.0, 0.0, 10.0, 5.0];
        let fit = fit_trendlines(&y, 0.001).unwrap();
        assert_eq!(fit.breakout, Breakout::None);
        assert_bounds(&y, &fit);
    }

    #[test]
    fn test_flat_window_terminates() {
        let y = [7.0; 5];
        let fit = fit_trendlines(&y, 0.001).unwrap();
        assert_eq!(fit.support_slope, 0.0);
        assert_eq!(fit.resistance_slope, 0.0);
        assert!(fit.support_line.iter().all(|&v| v == 7.0));
        // Last value sits on resistance, so the tie-break says bullish
        assert_eq!(fit.breakout, Breakout::Bullish);
    }

    #[test]
    fn test_invalid_windows() {
        assert!(fit_trendlines(&[], 0.001).is_none());
        assert!(fit_trendlines(&[1.0], 0.001).is_none());
        assert!(fit_trendlines(&[1.0, f64::NAN, 2.0], 0.001).is_none());
    }

    #[test]
    fn test_two_point_window() {
        let y = [3.0, 5.0];
        let fit = fit_trendlines(&y, 0.001).unwrap();
        assert_bounds(&y, &fit);
        assert_eq!(fit.breakout, Breakout::Bullish);
    }

    #[test]
    fn test_bullish_checked_first() {
        // Degenerate channel where both conditions hold
        assert_eq!(classify_breakout(100.0, 100.0, 100.0, 0.001), Breakout::Bullish);
        assert_eq!(classify_breakout(90.0, 90.05, 100.0, 0.001), Breakout::Bearish);
        assert_eq!(classify_breakout(95.0, 90.0, 100.0, 0.001), Breakout::None);
    }
}
