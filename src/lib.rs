//! Replays recorded JSON payloads as HTTP POST requests through a pool of
//! concurrent workers, with live per-window and cumulative statistics.

pub mod config;
pub mod load_generator;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod report;
pub mod source;

pub use config::{Cli, ConfigError, RunConfig};
pub use pipeline::{run, RunError, RunSummary};
pub use report::{Frame, Reporter, TerminalReporter};
