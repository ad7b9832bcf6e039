//! Trade file loading
//!
//! Reads Databento-style trade CSVs (`ts_event,price,size,side,...`), plain or
//! zstd-compressed. Rows are pulled lazily so a whole session never has to sit
//! in memory.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::trades::{Side, Trade};

/// CSV row; columns not listed here are ignored
#[derive(Debug, Deserialize)]
struct CsvRow {
    ts_event: String,
    price: f64,
    size: u64,
    side: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

/// Parse an RFC 3339 timestamp or integer nanoseconds since epoch
pub fn parse_ts_event(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        let nanos: i64 = raw
            .parse()
            .with_context(|| format!("Timestamp out of range: {}", raw))?;
        return Ok(DateTime::from_timestamp_nanos(nanos));
    }
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Failed to parse timestamp: {}", raw))?
        .with_timezone(&Utc))
}

impl CsvRow {
    /// `None` for rows that are not trade prints
    fn into_trade(self) -> Result<Option<Trade>> {
        if let Some(action) = &self.action {
            if action != "T" {
                return Ok(None);
            }
        }
        let side = match Side::from_code(self.side.trim()) {
            Some(side) => side,
            None => bail!("Unknown aggressor side code: {:?}", self.side),
        };
        Ok(Some(Trade {
            ts_event: parse_ts_event(&self.ts_event)?,
            price: self.price,
            size: self.size,
            side,
            symbol: self.symbol.unwrap_or_default(),
        }))
    }
}

/// Lazy iterator over the trades in a CSV source
pub struct TradeReader {
    records: csv::DeserializeRecordsIntoIter<Box<dyn Read + Send>, CsvRow>,
    last_ts: Option<DateTime<Utc>>,
    skipped: u64,
    row: u64,
}

impl TradeReader {
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Self {
        Self {
            records: csv::Reader::from_reader(reader).into_deserialize(),
            last_ts: None,
            skipped: 0,
            row: 0,
        }
    }

    /// Rows skipped because they were not trade prints
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl Iterator for TradeReader {
    type Item = Result<Trade>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = self.records.next()?;
            self.row += 1;
            let row = self.row;

            let trade = match record
                .with_context(|| format!("Failed to parse CSV row {}", row))
                .and_then(CsvRow::into_trade)
            {
                Ok(Some(trade)) => trade,
                Ok(None) => {
                    self.skipped += 1;
                    continue;
                }
                Err(e) => return Some(Err(e)),
            };

            if let Some(last) = self.last_ts {
                if trade.ts_event < last {
                    return Some(Err(anyhow::anyhow!(
                        "Trades out of order at row {}: {} after {}",
                        row,
                        trade.ts_event,
                        last
                    )));
                }
            }
            self.last_ts = Some(trade.ts_event);
            return Some(Ok(trade));
        }
    }
}

/// Open a trade file, decompressing `.zst` transparently
pub fn open_trades(path: &Path) -> Result<TradeReader> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;

    let reader: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "zst") {
        Box::new(
            zstd::stream::Decoder::new(file)
                .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?,
        )
    } else {
        Box::new(BufReader::new(file))
    };

    tracing::debug!("Reading trades from {:?}", path);
    Ok(TradeReader::from_reader(reader))
}

/// Read every trade in a file
pub fn load_trades(path: &Path) -> Result<Vec<Trade>> {
    let mut reader = open_trades(path)?;
    let trades = reader.by_ref().collect::<Result<Vec<_>>>()?;
    if reader.skipped() > 0 {
        tracing::debug!("Skipped {} non-trade rows", reader.skipped());
    }
    Ok(trades)
}
