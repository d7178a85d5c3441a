use std::collections::HashSet;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::{sort_samples, PercentileSet};
use super::stats::Counts;
use super::Metric;

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe accumulation buffer.
/// Consumer tasks call `record()` / `record_diagnostic()`, the reporting
/// tick calls `flush()`.
pub struct Accumulator {
    inner: Mutex<Inner>,
}

/// Everything one tick needs, taken in a single critical section.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    /// Counters observed since the previous flush
    pub counts: Counts,
    /// Latency samples observed since the previous flush, unsorted
    pub window_latencies: Vec<f64>,
    /// Percentiles over every latency sample of the run
    pub total_latency: PercentileSet,
    /// Deduplicated diagnostics, in arrival order
    pub diagnostics: Vec<String>,
}

/// A bucket in the run-wide latency distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistBucket {
    pub range_start_ms: f64,
    pub range_end_ms: f64,
    pub count: u64,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    // Window scope: cleared on every flush
    window: Counts,
    window_latencies: Vec<f64>,

    // Run scope: kept until the process exits
    all_latencies: Vec<f64>,
    latency_hist: Histogram<u64>,
    diagnostics: Vec<String>,
    seen: HashSet<String>,
}

// ─── Accumulator impl ────────────────────────────────────────────

impl Accumulator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Record a single request outcome.
    pub fn record(&self, metric: &Metric) {
        self.inner.lock().record(metric);
    }

    /// Record a diagnostic line unless the exact same text was seen before.
    /// Returns whether the line was new.
    pub fn record_diagnostic(&self, line: String) -> bool {
        self.inner.lock().record_diagnostic(line)
    }

    /// Snapshot and reset the window. Run-wide samples and diagnostics stay.
    pub fn flush(&self) -> WindowSnapshot {
        self.inner.lock().flush()
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.inner.lock().diagnostics.clone()
    }

    /// Bucketed distribution of every completed request so far.
    pub fn distribution(&self) -> Vec<DistBucket> {
        Inner::compute_distribution(&self.inner.lock().latency_hist)
    }

    pub fn pending_window(&self) -> Counts {
        self.inner.lock().window
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            window: Counts::default(),
            window_latencies: Vec::new(),
            all_latencies: Vec::with_capacity(1024),
            latency_hist: Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                .expect("histogram creation"),
            diagnostics: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn record(&mut self, metric: &Metric) {
        self.window.record(metric);

        // Transport failures carry no latency.
        if metric.is_error {
            return;
        }
        self.window_latencies.push(metric.latency_ms);
        self.all_latencies.push(metric.latency_ms);

        let us = (metric.latency_ms * 1_000.0).round() as u64;
        let _ = self.latency_hist.record(us.clamp(HIST_LOW, HIST_HIGH));
    }

    fn record_diagnostic(&mut self, line: String) -> bool {
        if self.seen.contains(&line) {
            return false;
        }
        self.seen.insert(line.clone());
        self.diagnostics.push(line);
        true
    }

    fn flush(&mut self) -> WindowSnapshot {
        // Kept sorted between ticks, so re-sorting is close to linear.
        sort_samples(&mut self.all_latencies);

        WindowSnapshot {
            counts: std::mem::take(&mut self.window),
            window_latencies: std::mem::take(&mut self.window_latencies),
            total_latency: PercentileSet::from_sorted(&self.all_latencies),
            diagnostics: self.diagnostics.clone(),
        }
    }

    // ── Distribution histogram ──────────────────────────────────

    /// Bucket boundaries (μs), from sub-millisecond up to the request timeout.
    const DIST_BOUNDARIES: &'static [u64] = &[
        1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000, 200_000, 500_000,
        1_000_000, 2_000_000, 5_000_000, 15_000_000,
    ];

    fn compute_distribution(hist: &Histogram<u64>) -> Vec<DistBucket> {
        if hist.len() == 0 {
            return Vec::new();
        }

        let bounds = Self::DIST_BOUNDARIES;
        let mut counts = vec![0u64; bounds.len() + 1]; // +1 for overflow

        for iv in hist.iter_recorded() {
            let val = iv.value_iterated_to();
            // First boundary >= val; past the end means overflow
            let idx = bounds.partition_point(|&b| b < val);
            counts[idx] += iv.count_at_value();
        }

        let to_ms = |us: u64| us as f64 / 1_000.0;
        let mut result = Vec::with_capacity(counts.len());
        let mut prev = 0u64;
        for (i, &boundary) in bounds.iter().enumerate() {
            if counts[i] > 0 {
                result.push(DistBucket {
                    range_start_ms: to_ms(prev),
                    range_end_ms: to_ms(boundary),
                    count: counts[i],
                });
            }
            prev = boundary;
        }
        let overflow = counts[bounds.len()];
        if overflow > 0 {
            result.push(DistBucket {
                range_start_ms: to_ms(prev),
                range_end_ms: to_ms(hist.max()),
                count: overflow,
            });
        }

        result
    }
}
