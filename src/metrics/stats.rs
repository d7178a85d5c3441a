use chrono::{DateTime, Utc};
use serde::Serialize;

use super::percentiles::PercentileSet;
use super::{Metric, StatusClass};

// ─── Counters ────────────────────────────────────────────────────

/// Request outcome counters. `success + error` is the request total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub success: u64,
    pub error: u64,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
}

impl Counts {
    pub fn total(&self) -> u64 {
        self.success + self.error
    }

    pub fn record(&mut self, metric: &Metric) {
        if metric.is_error {
            self.error += 1;
            return;
        }
        self.success += 1;
        match metric.status_class() {
            Some(StatusClass::Success) => self.status_2xx += 1,
            Some(StatusClass::Redirect) => self.status_3xx += 1,
            Some(StatusClass::ClientError) => self.status_4xx += 1,
            Some(StatusClass::ServerError) => self.status_5xx += 1,
            None => {}
        }
    }

    pub fn merge(&mut self, other: &Counts) {
        self.success += other.success;
        self.error += other.error;
        self.status_2xx += other.status_2xx;
        self.status_3xx += other.status_3xx;
        self.status_4xx += other.status_4xx;
        self.status_5xx += other.status_5xx;
    }

    pub fn status(&self, class: StatusClass) -> u64 {
        match class {
            StatusClass::Success => self.status_2xx,
            StatusClass::Redirect => self.status_3xx,
            StatusClass::ClientError => self.status_4xx,
            StatusClass::ServerError => self.status_5xx,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

// ─── Reported unit ───────────────────────────────────────────────

/// Statistics over one time span: either a single window or the whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_sec: f64,
    #[serde(flatten)]
    pub counts: Counts,
    pub latency: PercentileSet,
}

impl Stats {
    /// Empty span that starts and ends at `at`.
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            begin_time: at,
            end_time: at,
            duration_sec: 0.0,
            counts: Counts::default(),
            latency: PercentileSet::empty(),
        }
    }

    pub fn total_count(&self) -> u64 {
        self.counts.total()
    }

    /// Move the end of the span and recompute its duration.
    pub fn close_at(&mut self, end: DateTime<Utc>) {
        self.end_time = end;
        self.duration_sec = seconds_between(self.begin_time, end);
    }

    /// Successful requests per second, if any time has passed.
    pub fn success_per_sec(&self) -> Option<f64> {
        (self.duration_sec > 0.0).then(|| self.counts.success as f64 / self.duration_sec)
    }

    /// Share (percent) of successful requests that fell into `class`.
    /// Undefined without successes.
    pub fn status_share(&self, class: StatusClass) -> Option<f64> {
        (self.counts.success > 0)
            .then(|| self.counts.status(class) as f64 / self.counts.success as f64 * 100.0)
    }
}

pub(crate) fn seconds_between(begin: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let elapsed = end - begin;
    elapsed
        .num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or_else(|| elapsed.num_milliseconds() as f64 / 1_000.0)
        .max(0.0)
}

/// The pair the reporter renders: everything since start, and the last window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub total: Stats,
    pub window: Stats,
}

impl RunResult {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            total: Stats::starting_at(start),
            window: Stats::starting_at(start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn counts_classify_outcomes() {
        let mut counts = Counts::default();
        for metric in [
            Metric::response(200, 1.0),
            Metric::response(204, 1.0),
            Metric::response(301, 1.0),
            Metric::response(404, 1.0),
            Metric::response(500, 1.0),
            Metric::response(101, 1.0),
            Metric::transport_error(),
        ] {
            counts.record(&metric);
        }

        assert_eq!(counts.success, 6);
        assert_eq!(counts.error, 1);
        assert_eq!(counts.total(), 7);
        assert_eq!(counts.status_2xx, 2);
        assert_eq!(counts.status_3xx, 1);
        assert_eq!(counts.status_4xx, 1);
        assert_eq!(counts.status_5xx, 1);
    }

    #[test]
    fn shares_are_blank_without_successes() {
        let mut stats = Stats::starting_at(Utc::now());
        stats.counts.record(&Metric::transport_error());
        stats.counts.record(&Metric::transport_error());

        assert_eq!(stats.total_count(), stats.counts.success + stats.counts.error);
        for class in StatusClass::ALL {
            assert_eq!(stats.status_share(class), None);
        }
        assert_eq!(stats.success_per_sec(), None);
    }

    #[test]
    fn shares_and_throughput() {
        let begin = Utc::now();
        let mut stats = Stats::starting_at(begin);
        stats.counts.record(&Metric::response(200, 3.0));
        stats.counts.record(&Metric::response(200, 3.0));
        stats.counts.record(&Metric::response(200, 3.0));
        stats.counts.record(&Metric::response(503, 3.0));
        stats.close_at(begin + Duration::seconds(2));

        assert_eq!(stats.duration_sec, 2.0);
        assert_eq!(stats.success_per_sec(), Some(2.0));
        assert_eq!(stats.status_share(StatusClass::Success), Some(75.0));
        assert_eq!(stats.status_share(StatusClass::ServerError), Some(25.0));
        assert_eq!(stats.status_share(StatusClass::Redirect), Some(0.0));
    }

    #[test]
    fn merge_adds_field_by_field() {
        let mut a = Counts {
            success: 2,
            error: 1,
            status_2xx: 2,
            ..Counts::default()
        };
        let b = Counts {
            success: 3,
            error: 0,
            status_4xx: 3,
            ..Counts::default()
        };
        a.merge(&b);
        assert_eq!(a.total(), 6);
        assert_eq!(a.status_2xx, 2);
        assert_eq!(a.status_4xx, 3);
    }
}
