use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;
use thiserror::Error;

// ─── Defaults ────────────────────────────────────────────────────

pub const DEFAULT_URI: &str = "http://localhost:8081/";
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_REPEAT: u32 = 1;
pub const DEFAULT_SLEEP_MS: u64 = 0;
pub const DEFAULT_INTERVAL_MS: u64 = 1_000;

/// Dispatch and metrics queues hold this many items per worker.
const QUEUE_SLOTS_PER_WORKER: usize = 3;

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid target URI \"{uri}\": {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("unsupported scheme in target URI \"{0}\" (expected http or https)")]
    UnsupportedScheme(String),

    #[error("the number of workers must be at least 1")]
    NoWorkers,

    #[error("no JSON files given")]
    NoFiles,

    #[error("the repeat count must be at least 1")]
    ZeroRepeat,

    #[error("the reporting interval must be greater than 0 ms")]
    ZeroInterval,

    #[error("cannot build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

// ─── Command line ────────────────────────────────────────────────

/// Read JSON lines from files and POST them to a target, with live statistics.
#[derive(Debug, Clone, Parser)]
#[command(name = "json-replay-bench", version)]
pub struct Cli {
    /// Target URI
    #[arg(short, long, env = "JRB_URI", default_value = DEFAULT_URI)]
    pub uri: String,

    /// Number of concurrent workers issuing requests
    #[arg(short = 'n', long = "num-workers", env = "JRB_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub num_workers: usize,

    /// Number of passes over each file
    #[arg(short, long, env = "JRB_REPEAT", default_value_t = DEFAULT_REPEAT)]
    pub repeat: u32,

    /// Pause between consecutive requests of one worker (milliseconds)
    #[arg(short, long, env = "JRB_SLEEP_MS", default_value_t = DEFAULT_SLEEP_MS)]
    pub sleep: u64,

    /// Reporting interval (milliseconds)
    #[arg(short, long, env = "JRB_INTERVAL_MS", default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval: u64,

    /// Do not ask for confirmation when the default target is used
    #[arg(short, long)]
    pub yes: bool,

    /// Append uncoloured reports instead of redrawing the screen
    #[arg(long)]
    pub plain: bool,

    /// Write the final statistics as JSON to this file
    #[arg(long, value_name = "PATH")]
    pub summary: Option<PathBuf>,

    /// Files with one JSON value per line
    #[arg(value_name = "FILES")]
    pub files: Vec<PathBuf>,
}

impl Cli {
    pub fn uses_default_uri(&self) -> bool {
        self.uri == DEFAULT_URI
    }

    /// Validate and freeze the run parameters.
    pub fn to_config(&self) -> Result<RunConfig, ConfigError> {
        RunConfig::new(&self.uri, self.files.clone())?
            .with_workers(self.num_workers)
            .with_repeat(self.repeat)
            .with_pacing(Duration::from_millis(self.sleep))
            .with_report_interval(Duration::from_millis(self.interval))
            .validated()
    }
}

// ─── Run configuration ───────────────────────────────────────────

/// Everything a run needs. Built once at startup and passed by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub target: Url,
    pub files: Vec<PathBuf>,
    pub workers: usize,
    pub repeat: u32,
    pub pacing: Duration,
    pub report_interval: Duration,
}

impl RunConfig {
    /// Parse the target URI; every other setting starts at its default.
    pub fn new(uri: &str, files: Vec<PathBuf>) -> Result<Self, ConfigError> {
        Ok(Self {
            target: parse_target(uri)?,
            files,
            workers: DEFAULT_WORKERS,
            repeat: DEFAULT_REPEAT,
            pacing: Duration::from_millis(DEFAULT_SLEEP_MS),
            report_interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.files.is_empty() {
            return Err(ConfigError::NoFiles);
        }
        if self.repeat == 0 {
            return Err(ConfigError::ZeroRepeat);
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    pub fn dispatch_capacity(&self) -> usize {
        self.workers * QUEUE_SLOTS_PER_WORKER
    }

    pub fn metrics_capacity(&self) -> usize {
        self.workers * QUEUE_SLOTS_PER_WORKER
    }

    pub fn diagnostics_capacity(&self) -> usize {
        self.workers
    }
}

fn parse_target(uri: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(uri).map_err(|e| ConfigError::InvalidUri {
        uri: uri.to_owned(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::UnsupportedScheme(uri.to_owned())),
    }
}
