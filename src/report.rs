//! CSV outputs: finalized bars and position events

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::bars::Bar;
use crate::position::{Direction, PositionEvent};

/// Writes one CSV row per finalized bar
pub struct BarCsvWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl BarCsvWriter<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("Failed to create bar file: {:?}", path))?;
        Ok(Self::from_writer(file))
    }
}

impl<W: Write> BarCsvWriter<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            rows: 0,
        }
    }

    pub fn write(&mut self, bar: &Bar) -> Result<()> {
        self.writer.serialize(bar).context("Failed to write bar row")?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush bar file: {}", e.error()))
    }
}

#[derive(Debug, Serialize)]
struct EventRow {
    timestamp: DateTime<Utc>,
    event_type: &'static str,
    direction: Direction,
    price: f64,
    stop: Option<f64>,
    target: Option<f64>,
}

impl From<&PositionEvent> for EventRow {
    fn from(event: &PositionEvent) -> Self {
        match *event {
            PositionEvent::Enter {
                timestamp,
                direction,
                entry,
                stop,
                target,
            } => EventRow {
                timestamp,
                event_type: "ENTRY",
                direction,
                price: entry,
                stop: Some(stop),
                target: Some(target),
            },
            PositionEvent::ExitStopLoss {
                timestamp,
                direction,
                price,
            } => EventRow {
                timestamp,
                event_type: "STOP_LOSS",
                direction,
                price,
                stop: None,
                target: None,
            },
            PositionEvent::ExitTakeProfit {
                timestamp,
                direction,
                price,
            } => EventRow {
                timestamp,
                event_type: "TAKE_PROFIT",
                direction,
                price,
                stop: None,
                target: None,
            },
        }
    }
}

/// CSV log of entries and exits
pub struct EventLog<W: Write> {
    writer: csv::Writer<W>,
}

impl EventLog<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("Failed to create event log: {:?}", path))?;
        Ok(Self::from_writer(file))
    }
}

impl<W: Write> EventLog<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
        }
    }

    pub fn log(&mut self, event: &PositionEvent) -> Result<()> {
        self.writer
            .serialize(EventRow::from(event))
            .context("Failed to write event row")?;
        // Flush per event so the log survives a crash mid-run
        self.writer.flush().context("Failed to flush event log")?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush event log: {}", e.error()))
    }
}
