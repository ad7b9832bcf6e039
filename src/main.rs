use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};

use cvd_breakout::data;
use cvd_breakout::report::{BarCsvWriter, EventLog};
use cvd_breakout::streams;
use cvd_breakout::{BarOutcome, BarPolicy, BreakoutEngine, ColorMode, RunEnd, StrategyConfig};

#[derive(Parser, Debug)]
#[command(name = "cvd-breakout")]
#[command(about = "CVD trendline breakout signals from futures trade prints")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// JSON strategy config (flags below override it)
    #[arg(short, long, global = true, env = "CVD_BREAKOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args, Debug, Default)]
struct StrategyArgs {
    /// Tick bars: close every N trades
    #[arg(long, conflicts_with = "seconds")]
    ticks: Option<usize>,

    /// Time bars: bucket size in seconds
    #[arg(long)]
    seconds: Option<i64>,

    /// Trendline window size (bars)
    #[arg(long)]
    window: Option<usize>,

    /// Breakout tolerance as a fraction of resistance (0.001 = 0.1%)
    #[arg(long)]
    tolerance: Option<f64>,

    /// Reward:risk multiple for the target
    #[arg(long)]
    reward_risk: Option<f64>,

    /// Color bars by close vs open instead of vs previous bar range
    #[arg(long)]
    weak_colors: bool,

    /// Disable the volume confirmation filter
    #[arg(long)]
    no_volume_filter: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a trade file (CSV or .csv.zst) through the strategy
    Replay {
        /// Trade file in Databento trades CSV layout
        #[arg(short, long)]
        trades: PathBuf,

        /// Only use trades for this symbol
        #[arg(short, long)]
        symbol: Option<String>,

        /// Replay speed vs wall clock (0 = as fast as possible)
        #[arg(long, default_value = "0")]
        speed: f64,

        /// Write finalized bars to this CSV
        #[arg(long)]
        bars_out: Option<PathBuf>,

        /// Write entries/exits to this CSV
        #[arg(long)]
        events_out: Option<PathBuf>,

        #[command(flatten)]
        strategy: StrategyArgs,
    },

    /// Run the strategy on seeded synthetic trades
    Demo {
        /// Number of trades to generate
        #[arg(long, default_value = "20000")]
        count: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        #[command(flatten)]
        strategy: StrategyArgs,
    },
}

fn build_config(path: Option<&PathBuf>, args: &StrategyArgs) -> Result<StrategyConfig> {
    let mut config = match path {
        Some(path) => StrategyConfig::from_json_file(path)?,
        None => StrategyConfig::default(),
    };

    if let Some(n) = args.ticks {
        config.bar_policy = BarPolicy::TickCount(n);
    }
    if let Some(secs) = args.seconds {
        config.bar_policy = BarPolicy::seconds(secs);
    }
    if let Some(k) = args.window {
        config.window_size = k;
    }
    if let Some(tol) = args.tolerance {
        config.breakout_tolerance = tol;
    }
    if let Some(r) = args.reward_risk {
        config.reward_risk = r;
    }
    if args.weak_colors {
        config.color_mode = ColorMode::Weak;
    }
    if args.no_volume_filter {
        config.filters.volume = false;
    }

    config.validate()?;
    Ok(config)
}

/// Ctrl-C flips the flag; the engine stops at the next finished bar
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted by user; stopping after the current bar");
            let _ = tx.send(true);
        }
    });
    rx
}

#[derive(Default)]
struct Outputs {
    bars: Option<BarCsvWriter<std::fs::File>>,
    events: Option<EventLog<std::fs::File>>,
    bar_count: u64,
    error: Option<anyhow::Error>,
}

impl Outputs {
    fn handle(&mut self, outcome: &BarOutcome) {
        self.bar_count += 1;
        if self.error.is_some() {
            return;
        }
        if let Some(bars) = &mut self.bars {
            if let Err(e) = bars.write(&outcome.bar) {
                self.error = Some(e);
                return;
            }
        }
        if let (Some(events), Some(event)) = (&mut self.events, &outcome.event) {
            if let Err(e) = events.log(event) {
                self.error = Some(e);
            }
        }
    }

    fn finish(self) -> Result<u64> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if let Some(bars) = self.bars {
            bars.into_inner()?;
        }
        if let Some(events) = self.events {
            events.into_inner()?;
        }
        Ok(self.bar_count)
    }
}

fn print_results(engine: &BreakoutEngine, bars: u64, end: RunEnd) {
    let summary = engine.summary();

    println!("\n═══════════════════════════════════════════════════════════");
    println!("              CVD BREAKOUT RESULTS                          ");
    println!("═══════════════════════════════════════════════════════════\n");

    println!("Bar policy:        {}", engine.config().bar_policy);
    println!("Bars processed:    {}", bars);
    println!("Final CVD:         {}", engine.cvd());
    println!("Entries:           {}", summary.entries);
    println!("Stop-loss exits:   {}", summary.stop_losses);
    println!("Take-profit exits: {}", summary.take_profits);
    println!("Win rate:          {:.1}%", summary.win_rate() * 100.0);
    println!("Realized P&L:      {:+.2} pts ({:+.1}R)", summary.gross_points, summary.total_r);
    if let Some(pos) = engine.positions().position() {
        println!(
            "Open position:     {} @ {:.2} (stop {:.2}, target {:.2})",
            pos.direction, pos.entry, pos.stop, pos.target
        );
    }
    if end == RunEnd::Cancelled {
        println!("\nRun was cancelled before the end of the stream.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = if args.verbose { "cvd_breakout=debug" } else { "cvd_breakout=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.parse()?),
        )
        .init();

    match args.command {
        Commands::Replay {
            trades,
            symbol,
            speed,
            bars_out,
            events_out,
            strategy,
        } => {
            let config = build_config(args.config.as_ref(), &strategy)?;
            info!("=== REPLAY ===");
            info!("Trades: {:?}", trades);
            info!("Bars: {} | window {} | R {}", config.bar_policy, config.window_size, config.reward_risk);

            let mut engine = BreakoutEngine::new(config)?;
            if let Some(symbol) = symbol {
                engine = engine.with_symbol(symbol);
            }

            let mut outputs = Outputs {
                bars: bars_out.as_deref().map(BarCsvWriter::create).transpose()?,
                events: events_out.as_deref().map(EventLog::create).transpose()?,
                ..Default::default()
            };

            let reader = data::open_trades(&trades)?;
            let stream = streams::paced(streams::file_stream(reader), speed);
            let result = engine
                .run_stream(stream, cancel_on_ctrl_c(), |o| outputs.handle(o))
                .await;

            let bars = outputs.finish()?;
            match result {
                Ok(end) => print_results(&engine, bars, end),
                Err(e) => {
                    error!("Replay stopped: {:#}", e);
                    print_results(&engine, bars, RunEnd::Completed);
                    return Err(e);
                }
            }
        }

        Commands::Demo {
            count,
            seed,
            strategy,
        } => {
            let config = build_config(args.config.as_ref(), &strategy)?;
            info!("=== DEMO === {} synthetic trades, seed {}", count, seed);

            let mut engine = BreakoutEngine::new(config)?;
            let mut outputs = Outputs::default();
            let end = engine
                .run_stream(
                    streams::demo_trades(seed, count, Utc::now()),
                    cancel_on_ctrl_c(),
                    |o| outputs.handle(o),
                )
                .await?;
            let bars = outputs.finish()?;
            print_results(&engine, bars, end);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = StrategyArgs {
            ticks: Some(1000),
            window: Some(7),
            weak_colors: true,
            ..Default::default()
        };
        let config = build_config(None, &args).unwrap();
        assert_eq!(config.bar_policy, BarPolicy::TickCount(1000));
        assert_eq!(config.window_size, 7);
        assert_eq!(config.color_mode, ColorMode::Weak);
        assert_eq!(config.reward_risk, 2.0);
    }

    #[test]
    fn test_invalid_flags_fail_fast() {
        let args = StrategyArgs {
            reward_risk: Some(-1.0),
            ..Default::default()
        };
        assert!(build_config(None, &args).is_err());
    }

    #[test]
    fn test_cli_parses_replay() {
        let args = Args::try_parse_from([
            "cvd-breakout",
            "replay",
            "--trades",
            "mes.csv.zst",
            "--ticks",
            "1000",
        ])
        .unwrap();
        assert!(matches!(args.command, Commands::Replay { .. }));
    }
}
