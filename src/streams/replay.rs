//! Replay mode: trades from a file, optionally paced to wall-clock time

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::time::Duration;

use crate::data::TradeReader;
use crate::trades::Trade;

/// Lazy stream over a trade file reader
pub fn file_stream(reader: TradeReader) -> impl Stream<Item = Result<Trade>> {
    futures::stream::iter(reader)
}

/// Delay each trade by its gap to the previous one, divided by `speed`.
///
/// A `speed` of 0 or less disables pacing.
pub fn paced<S>(trades: S, speed: f64) -> impl Stream<Item = Result<Trade>>
where
    S: Stream<Item = Result<Trade>>,
{
    let mut last: Option<DateTime<Utc>> = None;
    trades.then(move |item| {
        let delay = match (&item, last) {
            (Ok(trade), Some(prev)) if speed > 0.0 => {
                let gap_ms = (trade.ts_event - prev).num_milliseconds().max(0) as f64;
                Some(Duration::from_secs_f64(gap_ms / 1000.0 / speed))
            }
            _ => None,
        };
        if let Ok(trade) = &item {
            last = Some(trade.ts_event);
        }
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trades::Side;
    use chrono::TimeZone;

    #[tokio::test(start_paused = true)]
    async fn test_paced_preserves_order() {
        let trades: Vec<Result<Trade>> = (0..3)
            .map(|i| {
                Ok(Trade {
                    ts_event: Utc.timestamp_millis_opt(i * 1000).unwrap(),
                    price: 100.0,
                    size: 1,
                    side: Side::Buy,
                    symbol: "MESM5".to_string(),
                })
            })
            .collect();

        let start = tokio::time::Instant::now();
        let out: Vec<Trade> = paced(futures::stream::iter(trades), 10.0)
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(out.len(), 3);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
