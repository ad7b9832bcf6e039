//! Position state machine and realized P&L tracking
//!
//! Flat -> Long/Short on an accepted breakout, back to Flat when a later bar
//! touches the stop or the target. The stop is checked first, so a bar that
//! spans both levels is always a stop-loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bars::Bar;
use crate::config::{validate_reward_risk, ConfigError};
use crate::trendline::Breakout;
use crate::window::RollingWindow;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn from_breakout(breakout: Breakout) -> Option<Self> {
        match breakout {
            Breakout::Bullish => Some(Direction::Long),
            Breakout::Bearish => Some(Direction::Short),
            Breakout::None => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Flat,
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

/// Event handed to the execution side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PositionEvent {
    Enter {
        timestamp: DateTime<Utc>,
        direction: Direction,
        entry: f64,
        stop: f64,
        target: f64,
    },
    ExitStopLoss {
        timestamp: DateTime<Utc>,
        direction: Direction,
        price: f64,
    },
    ExitTakeProfit {
        timestamp: DateTime<Utc>,
        direction: Direction,
        price: f64,
    },
}

impl PositionEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PositionEvent::Enter { timestamp, .. }
            | PositionEvent::ExitStopLoss { timestamp, .. }
            | PositionEvent::ExitTakeProfit { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_exit(&self) -> bool {
        !matches!(self, PositionEvent::Enter { .. })
    }
}

/// Currently open position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub entry_time: DateTime<Utc>,
}

/// Completed position record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub direction: Direction,
    pub entry: f64,
    pub exit: f64,
    pub stop: f64,
    pub target: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub reason: ExitReason,
    /// P&L in price points
    pub pnl_points: f64,
    /// P&L in units of initial risk (0 when risk was zero)
    pub r_multiple: f64,
}

/// Run totals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub entries: u32,
    pub stop_losses: u32,
    pub take_profits: u32,
    pub wins: u32,
    pub losses: u32,
    pub gross_points: f64,
    pub total_r: f64,
}

impl RunSummary {
    pub fn closed(&self) -> u32 {
        self.stop_losses + self.take_profits
    }

    pub fn win_rate(&self) -> f64 {
        if self.closed() == 0 {
            0.0
        } else {
            self.wins as f64 / self.closed() as f64
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Entries: {} | Stops: {} | Targets: {} | P&L: {:+.2} pts ({:+.1}R) | WR: {:.1}%",
            self.entries,
            self.stop_losses,
            self.take_profits,
            self.gross_points,
            self.total_r,
            self.win_rate() * 100.0
        )
    }
}

/// Owns position/risk state and reversal memory for one run
#[derive(Debug)]
pub struct PositionManager {
    reward_risk: f64,
    position: Option<OpenPosition>,
    last_signal: Option<Direction>,
    history: Vec<ClosedPosition>,
    summary: RunSummary,
}

impl PositionManager {
    /// `reward_risk` is the target distance as a multiple of stop distance
    pub fn new(reward_risk: f64) -> Result<Self, ConfigError> {
        validate_reward_risk(reward_risk)?;
        Ok(Self {
            reward_risk,
            position: None,
            last_signal: None,
            history: Vec::new(),
            summary: RunSummary::default(),
        })
    }

    pub fn state(&self) -> PositionState {
        match self.position.as_ref().map(|p| p.direction) {
            None => PositionState::Flat,
            Some(Direction::Long) => PositionState::Long,
            Some(Direction::Short) => PositionState::Short,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        self.position.as_ref()
    }

    /// Direction of the last accepted signal, cleared on every exit
    pub fn last_signal(&self) -> Option<Direction> {
        self.last_signal
    }

    pub fn history(&self) -> &[ClosedPosition] {
        &self.history
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Open a position on an accepted signal. Ignored unless flat.
    ///
    /// Entry is the window's latest close; the stop is the window's lowest
    /// close for longs and highest close for shorts.
    pub fn try_enter(
        &mut self,
        signal: Breakout,
        window: &RollingWindow,
        timestamp: DateTime<Utc>,
    ) -> Option<PositionEvent> {
        if self.position.is_some() {
            return None;
        }
        let direction = Direction::from_breakout(signal)?;
        let entry = window.last_close()?;

        let (stop, target) = match direction {
            Direction::Long => {
                let stop = window.min_close()?;
                (stop, entry + (entry - stop) * self.reward_risk)
            }
            Direction::Short => {
                let stop = window.max_close()?;
                (stop, entry - (stop - entry) * self.reward_risk)
            }
        };

        if stop == entry {
            warn!("{} entry at {:.2} has zero risk (stop == entry)", direction, entry);
        }

        self.position = Some(OpenPosition {
            direction,
            entry,
            stop,
            target,
            entry_time: timestamp,
        });
        self.last_signal = Some(direction);
        self.summary.entries += 1;

        info!(
            "ENTRY {} @ {:.2} | stop {:.2} | target {:.2}",
            direction, entry, stop, target
        );

        Some(PositionEvent::Enter {
            timestamp,
            direction,
            entry,
            stop,
            target,
        })
    }

    /// Check the open position against a new bar
    pub fn check_exit(&mut self, bar: &Bar) -> Option<PositionEvent> {
        let position = self.position.as_ref()?;

        let reason = match position.direction {
            Direction::Long if bar.low <= position.stop => ExitReason::StopLoss,
            Direction::Long if bar.high >= position.target => ExitReason::TakeProfit,
            Direction::Short if bar.high >= position.stop => ExitReason::StopLoss,
            Direction::Short if bar.low <= position.target => ExitReason::TakeProfit,
            _ => return None,
        };

        let position = self.position.take()?;
        self.last_signal = None;

        let exit = match reason {
            ExitReason::StopLoss => position.stop,
            ExitReason::TakeProfit => position.target,
        };
        let closed = self.record_exit(position, exit, bar.timestamp, reason);

        info!(
            "EXIT {} {} @ {:.2} | pnl {:+.2} pts ({:+.2}R)",
            closed.direction, reason, exit, closed.pnl_points, closed.r_multiple
        );

        let event = match reason {
            ExitReason::StopLoss => PositionEvent::ExitStopLoss {
                timestamp: bar.timestamp,
                direction: closed.direction,
                price: exit,
            },
            ExitReason::TakeProfit => PositionEvent::ExitTakeProfit {
                timestamp: bar.timestamp,
                direction: closed.direction,
                price: exit,
            },
        };
        Some(event)
    }

    fn record_exit(
        &mut self,
        position: OpenPosition,
        exit: f64,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
    ) -> ClosedPosition {
        let pnl_points = match position.direction {
            Direction::Long => exit - position.entry,
            Direction::Short => position.entry - exit,
        };
        let risk = (position.entry - position.stop).abs();
        let r_multiple = if risk > 0.0 { pnl_points / risk } else { 0.0 };

        match reason {
            ExitReason::StopLoss => self.summary.stop_losses += 1,
            ExitReason::TakeProfit => self.summary.take_profits += 1,
        }
        if pnl_points > 0.0 {
            self.summary.wins += 1;
        } else {
            self.summary.losses += 1;
        }
        self.summary.gross_points += pnl_points;
        self.summary.total_r += r_multiple;

        let closed = ClosedPosition {
            direction: position.direction,
            entry: position.entry,
            exit,
            stop: position.stop,
            target: position.target,
            entry_time: position.entry_time,
            exit_time,
            reason,
            pnl_points,
            r_multiple,
        };
        self.history.push(closed.clone());
        closed
    }
}
