//! Trade sources handed to the engine as lazy streams

mod demo;
mod replay;

pub use demo::{demo_trades, DemoTrades};
pub use replay::{file_stream, paced};
