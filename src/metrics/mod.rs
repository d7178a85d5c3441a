pub mod accumulator;
pub mod aggregator;
pub mod percentiles;
pub mod stats;

use std::fmt;

use serde::Serialize;

pub use accumulator::{Accumulator, DistBucket, WindowSnapshot};
pub use aggregator::{AggregateOutcome, Aggregator, Phase};
pub use percentiles::PercentileSet;
pub use stats::{Counts, RunResult, Stats};

/// Outcome of one attempted request.
/// This is the "write" side: workers create these and push them in.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Response status; `None` when no response arrived
    pub status_code: Option<u16>,
    /// true when the request failed at the transport level
    pub is_error: bool,
    /// Wall time from request start to response headers (ms). Zero on error.
    pub latency_ms: f64,
}

impl Metric {
    pub fn response(status_code: u16, latency_ms: f64) -> Self {
        Self {
            status_code: Some(status_code),
            is_error: false,
            latency_ms,
        }
    }

    pub fn transport_error() -> Self {
        Self {
            status_code: None,
            is_error: true,
            latency_ms: 0.0,
        }
    }

    pub fn status_class(&self) -> Option<StatusClass> {
        self.status_code.and_then(StatusClass::of)
    }
}

/// The four status families tracked separately in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Success,
    Redirect,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub const ALL: [StatusClass; 4] = [
        StatusClass::Success,
        StatusClass::Redirect,
        StatusClass::ClientError,
        StatusClass::ServerError,
    ];

    pub fn of(code: u16) -> Option<Self> {
        match code / 100 {
            2 => Some(Self::Success),
            3 => Some(Self::Redirect),
            4 => Some(Self::ClientError),
            5 => Some(Self::ServerError),
            _ => None,
        }
    }
}

// ─── Diagnostics ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// A warning or error line shown under the report.
/// Two diagnostics are the same when their rendered text is identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
}

impl Diagnostic {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            message: message.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: Level::Warn,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level.as_str(), self.message)
    }
}
