//! Property tests for aggregation, fitting and position invariants.
//!
//! 1. Running CVD equals the sum of signed trade sizes
//! 2. Tick bars hold exactly N trades except the final partial bar
//! 3. Time bars never mix buckets and open in strictly increasing order
//! 4. Fitted lines pass through their pivots and bound the series
//! 5. A bar touching both stop and target always exits at the stop

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use cvd_breakout::trendline::FEASIBILITY_EPS;
use cvd_breakout::{
    fit_trendlines, Bar, BarAggregator, BarPolicy, Breakout, ColorMode, CvdColor, PositionEvent,
    PositionManager, RollingWindow, Side, Trade,
};

// ── Strategies ───────────────────────────────────────────────────────

fn arb_side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell), Just(Side::None)]
}

fn arb_trade_parts() -> impl Strategy<Value = (u64, u64, Side)> {
    // (ms gap to previous trade, size, side)
    (0..3_000u64, 1..50u64, arb_side())
}

fn arb_window() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-5_000.0..5_000.0_f64, 2..12)
}

fn build_trades(parts: &[(u64, u64, Side)]) -> Vec<Trade> {
    let start = Utc.with_ymd_and_hms(2025, 5, 7, 13, 30, 0).unwrap();
    let mut ms = start.timestamp_millis();
    parts
        .iter()
        .enumerate()
        .map(|(i, &(gap, size, side))| {
            ms += gap as i64;
            Trade {
                ts_event: ts(ms),
                price: 5650.0 + (i % 7) as f64 * 0.25,
                size,
                side,
                symbol: "MESM5".to_string(),
            }
        })
        .collect()
}

fn ts(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn run_all(agg: &mut BarAggregator, trades: &[Trade]) -> Vec<Bar> {
    let mut bars: Vec<Bar> = trades.iter().filter_map(|t| agg.process_trade(t)).collect();
    bars.extend(agg.flush());
    bars
}

// ── 1. CVD accounting ────────────────────────────────────────────────

proptest! {
    #[test]
    fn running_cvd_is_sum_of_deltas(
        parts in prop::collection::vec(arb_trade_parts(), 1..300),
        n in 1..20usize,
    ) {
        let trades = build_trades(&parts);
        let mut agg = BarAggregator::new(BarPolicy::TickCount(n), ColorMode::Strong).unwrap();
        let bars = run_all(&mut agg, &trades);

        let expected: i64 = trades.iter().map(|t| t.delta()).sum();
        prop_assert_eq!(agg.cvd(), expected);
        prop_assert_eq!(bars.last().unwrap().cvd, expected);

        // Each bar's CVD is the previous bar's CVD plus its own delta
        let mut prev = 0i64;
        for bar in &bars {
            prop_assert_eq!(bar.cvd, prev + bar.delta);
            prop_assert!(bar.delta.unsigned_abs() <= bar.volume);
            prev = bar.cvd;
        }
    }
}

// ── 2. Tick bars ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn tick_bars_hold_n_trades(
        parts in prop::collection::vec(arb_trade_parts(), 1..300),
        n in 1..25usize,
    ) {
        let trades = build_trades(&parts);
        let mut agg = BarAggregator::new(BarPolicy::TickCount(n), ColorMode::Strong).unwrap();
        let bars = run_all(&mut agg, &trades);

        prop_assert_eq!(bars.len(), trades.len().div_ceil(n));
        let (last, full) = bars.split_last().unwrap();
        for bar in full {
            prop_assert_eq!(bar.trade_count as usize, n);
        }
        prop_assert!(last.trade_count as usize <= n);

        let total: u64 = bars.iter().map(|b| b.trade_count).sum();
        prop_assert_eq!(total as usize, trades.len());
    }
}

// ── 3. Time bars ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn time_bars_respect_buckets(
        parts in prop::collection::vec(arb_trade_parts(), 1..300),
        secs in 1..30i64,
    ) {
        let trades = build_trades(&parts);
        let ms = secs * 1000;
        let mut agg = BarAggregator::new(BarPolicy::seconds(secs), ColorMode::Weak).unwrap();
        let bars = run_all(&mut agg, &trades);

        let mut buckets: Vec<i64> = trades
            .iter()
            .map(|t| t.ts_event.timestamp_millis().div_euclid(ms) * ms)
            .collect();
        buckets.dedup();
        prop_assert_eq!(bars.len(), buckets.len());

        for (bar, bucket) in bars.iter().zip(&buckets) {
            prop_assert_eq!(bar.timestamp.timestamp_millis(), *bucket);
        }
        for pair in bars.windows(2) {
            prop_assert!(pair[0].timestamp < pair[1].timestamp);
        }

        let total: u64 = bars.iter().map(|b| b.trade_count).sum();
        prop_assert_eq!(total as usize, trades.len());
    }
}

// ── 4. Trendline fitting ─────────────────────────────────────────────

proptest! {
    #[test]
    fn fitted_lines_bound_the_window(y in arb_window(), tolerance in 0.0..0.01_f64) {
        let fit = fit_trendlines(&y, tolerance).unwrap();

        prop_assert!((fit.support_line[fit.support_pivot] - y[fit.support_pivot]).abs() < 1e-6);
        prop_assert!((fit.resistance_line[fit.resistance_pivot] - y[fit.resistance_pivot]).abs() < 1e-6);

        for (i, &v) in y.iter().enumerate() {
            prop_assert!(v - fit.support_line[i] >= -FEASIBILITY_EPS);
            prop_assert!(fit.resistance_line[i] - v >= -FEASIBILITY_EPS);
        }
    }

    #[test]
    fn non_finite_windows_are_rejected(mut y in arb_window(), idx in 0..12usize) {
        let i = idx % y.len();
        y[i] = f64::NAN;
        prop_assert!(fit_trendlines(&y, 0.001).is_none());
    }
}

// ── 5. Stop-loss priority ────────────────────────────────────────────

proptest! {
    #[test]
    fn stop_wins_when_bar_spans_both_levels(
        closes in prop::collection::vec(90.0..110.0_f64, 3..8),
        long in any::<bool>(),
        reward_risk in 0.5..4.0_f64,
        overshoot in 0.0..20.0_f64,
    ) {
        let mut window = RollingWindow::new(closes.len());
        for (i, &c) in closes.iter().enumerate() {
            window.push(i as f64, c, 10.0);
        }

        let mut manager = PositionManager::new(reward_risk).unwrap();
        let signal = if long { Breakout::Bullish } else { Breakout::Bearish };
        let entered = manager.try_enter(signal, &window, ts(0));
        prop_assert!(entered.is_some());

        let pos = manager.position().unwrap().clone();
        let lo = pos.stop.min(pos.target) - overshoot;
        let hi = pos.stop.max(pos.target) + overshoot;
        let bar = Bar {
            timestamp: ts(60_000),
            open: pos.entry,
            high: hi,
            low: lo,
            close: pos.entry,
            volume: 1,
            buy_volume: 1,
            sell_volume: 0,
            delta: 1,
            cvd: 1,
            trade_count: 1,
            vwap: pos.entry,
            color: CvdColor::Gray,
            symbol: "MESM5".to_string(),
        };

        let exit = manager.check_exit(&bar);
        let is_stop = matches!(
            exit,
            Some(PositionEvent::ExitStopLoss { price, .. }) if price == pos.stop
        );
        prop_assert!(is_stop);
        prop_assert!(manager.is_flat());
        prop_assert!(manager.last_signal().is_none());
    }
}
