use serde::Serialize;

/// A complete latency breakdown (milliseconds) for one sample set.
/// Serialized straight into the run summary and shown in the report tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PercentileSet {
    pub min: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub max: f64,
    pub avg: f64,
    pub count: u64,
}

impl PercentileSet {
    /// Build a breakdown from samples already sorted ascending.
    /// Returns the zeroed set if there are no samples.
    pub fn from_sorted(sorted: &[f64]) -> Self {
        let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
            return Self::empty();
        };

        let rank = |pct| nearest_rank(sorted, pct).unwrap_or_default();

        Self {
            min,
            p10: rank(10),
            p50: rank(50),
            p90: rank(90),
            p99: rank(99),
            max,
            avg: sorted.iter().sum::<f64>() / sorted.len() as f64,
            count: sorted.len() as u64,
        }
    }

    /// Sort `samples` in place, then build the breakdown.
    pub fn from_samples(samples: &mut [f64]) -> Self {
        sort_samples(samples);
        Self::from_sorted(samples)
    }

    /// All-zero placeholder used before any samples are recorded.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Is this set backed by at least one observation?
    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

pub fn sort_samples(samples: &mut [f64]) {
    samples.sort_unstable_by(f64::total_cmp);
}

/// Nearest-rank percentile: the sample at index `ceil(pct/100 · n) − 1`
/// of an ascending slice. Integer arithmetic keeps the rank exact.
pub fn nearest_rank(sorted: &[f64], pct: u32) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len() as u64;
    let rank = (u64::from(pct.min(100)) * n).div_ceil(100).max(1);
    sorted.get((rank - 1) as usize).copied()
}
