//! Rendering of the live report.
//!
//! The aggregator hands a [`Frame`] to a [`Reporter`] once per tick and once
//! more when the run is finished. [`TerminalReporter`] draws the banner, the
//! totals table, the current-window table and the diagnostics.

use std::io::{self, Write};

use chrono::{DateTime, Local, Utc};
use tracing::debug;

use crate::metrics::{DistBucket, RunResult, Stats, StatusClass};

/// What a reporter gets to see on each tick.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub result: &'a RunResult,
    /// Deduplicated diagnostic lines, oldest first
    pub diagnostics: &'a [String],
    /// Run-wide latency distribution; only filled on the final frame
    pub distribution: &'a [DistBucket],
    pub is_final: bool,
}

/// Renders frames. Called from the aggregator's reporting task only.
///
/// `render` is synchronous. On a multi-threaded runtime the aggregator runs it
/// through `block_in_place`, so a slow writer delays the next tick but never
/// the queue consumers.
pub trait Reporter: Send {
    fn render(&mut self, frame: &Frame<'_>);
}

// ─── ANSI helpers ────────────────────────────────────────────────

const CLEAR_HOME: &str = "\x1b[2J\x1b[H";
const RESET: &str = "\x1b[0m";
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";

const BANNER: &str = "\
╔══════════════════════════════════════════════════╗
║   JSON REPLAY BENCH                              ║
╚══════════════════════════════════════════════════╝";

const COLUMNS: [&str; 16] = [
    "From",
    "To",
    "Duration[s]",
    "OK(/sec)",
    "NG",
    "2xx(R[%])",
    "3xx(R[%])",
    "4xx(R[%])",
    "5xx(R[%])",
    "Min[ms]",
    "P10[ms]",
    "P50[ms]",
    "P90[ms]",
    "P99[ms]",
    "Max[ms]",
    "Ave[ms]",
];

// ─── Terminal reporter ───────────────────────────────────────────

pub struct TerminalReporter<W> {
    out: W,
    /// Clear the screen before every frame instead of appending
    redraw: bool,
    color: bool,
}

impl TerminalReporter<io::Stdout> {
    /// Live, coloured, redrawing output; `plain` appends uncoloured frames.
    pub fn stdout(plain: bool) -> Self {
        Self::new(io::stdout(), !plain, !plain)
    }
}

impl<W: Write> TerminalReporter<W> {
    pub fn new(out: W, redraw: bool, color: bool) -> Self {
        Self { out, redraw, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, colour: &'static str, text: &str) -> String {
        if self.color {
            format!("{colour}{text}{RESET}")
        } else {
            text.to_owned()
        }
    }

    fn write_frame(&mut self, frame: &Frame<'_>) -> io::Result<()> {
        let mut buf = String::with_capacity(4096);

        if self.redraw {
            buf.push_str(CLEAR_HOME);
        }
        buf.push_str(&self.paint(CYAN, BANNER));
        buf.push('\n');

        buf.push_str(&self.paint(CYAN, "──── TOTAL ────"));
        buf.push('\n');
        buf.push_str(&stats_table(&frame.result.total));

        buf.push_str(&self.paint(CYAN, "──── CURRENT ────"));
        buf.push('\n');
        buf.push_str(&stats_table(&frame.result.window));

        buf.push_str(&self.paint(CYAN, "──── LOGS ────"));
        buf.push('\n');
        for line in frame.diagnostics {
            let colour = if line.starts_with("ERROR") {
                RED
            } else if line.starts_with("WARN") {
                YELLOW
            } else {
                GREEN
            };
            buf.push_str(&self.paint(colour, line));
            buf.push('\n');
        }

        if frame.is_final && !frame.distribution.is_empty() {
            buf.push_str(&self.paint(CYAN, "──── LATENCY DISTRIBUTION ────"));
            buf.push('\n');
            buf.push_str(&distribution_chart(frame.distribution));
        }

        self.out.write_all(buf.as_bytes())?;
        self.out.flush()
    }
}

impl<W: Write + Send> Reporter for TerminalReporter<W> {
    fn render(&mut self, frame: &Frame<'_>) {
        if let Err(e) = self.write_frame(frame) {
            debug!(error = %e, "failed to write report frame");
        }
    }
}

// ─── Formatting ──────────────────────────────────────────────────

/// One header row plus one value row, columns padded to fit.
pub fn stats_table(stats: &Stats) -> String {
    let values = stats_row(stats);

    let widths: Vec<usize> = COLUMNS
        .iter()
        .zip(&values)
        .map(|(h, v)| h.chars().count().max(v.chars().count()))
        .collect();

    let mut out = String::new();
    for (i, header) in COLUMNS.iter().enumerate() {
        out.push_str(&format!("{header:>w$}  ", w = widths[i]));
    }
    out.push('\n');
    for (i, value) in values.iter().enumerate() {
        out.push_str(&format!("{value:>w$}  ", w = widths[i]));
    }
    out.push('\n');
    out
}

/// Cell values in `COLUMNS` order. Undefined ratios render as `-`.
pub fn stats_row(stats: &Stats) -> Vec<String> {
    let counts = &stats.counts;
    let mut row = Vec::with_capacity(COLUMNS.len());

    row.push(clock(stats.begin_time));
    row.push(clock(stats.end_time));
    row.push(format!("{:.1}", stats.duration_sec));
    row.push(match stats.success_per_sec() {
        Some(rate) => format!("{}({rate:.2}/sec)", counts.success),
        None => format!("{}(-)", counts.success),
    });
    row.push(counts.error.to_string());

    for class in StatusClass::ALL {
        let n = counts.status(class);
        row.push(match stats.status_share(class) {
            Some(pct) => format!("{n}({pct:.1})"),
            None => format!("{n}(-)"),
        });
    }

    let lat = &stats.latency;
    for v in [lat.min, lat.p10, lat.p50, lat.p90, lat.p99, lat.max, lat.avg] {
        row.push(if lat.has_data() {
            format!("{v:.3}")
        } else {
            "-".to_owned()
        });
    }

    row
}

fn clock(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Horizontal bar per bucket, scaled to the busiest one.
pub fn distribution_chart(buckets: &[DistBucket]) -> String {
    const BAR_WIDTH: u64 = 40;

    let peak = buckets.iter().map(|b| b.count).max().unwrap_or(0).max(1);
    let mut out = String::new();
    for b in buckets {
        let len = (b.count * BAR_WIDTH).div_ceil(peak) as usize;
        out.push_str(&format!(
            "{:>9.1} - {:>9.1} ms │ {:<40} {}\n",
            b.range_start_ms,
            b.range_end_ms,
            "█".repeat(len),
            b.count
        ));
    }
    out
}
