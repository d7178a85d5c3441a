use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::{self, JoinError};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::accumulator::{Accumulator, DistBucket};
use super::percentiles::PercentileSet;
use super::stats::{seconds_between, RunResult, Stats};
use super::{Diagnostic, Metric};
use crate::queue::QueueReceiver;
use crate::report::{Frame, Reporter};

/// Lifecycle of one aggregation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Ticking on schedule while both queues are open
    Running,
    /// At least one queue closed; waiting for the other consumer
    Draining,
    /// Both consumers gone; one last flush and report
    Finalizing,
    Done,
}

/// What is left after the final report.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub result: RunResult,
    pub diagnostics: Vec<String>,
    pub distribution: Vec<DistBucket>,
    /// Reports rendered, the final one included
    pub ticks: u64,
}

/// Sole consumer of the metrics and diagnostics queues, and the driver of
/// periodic reporting.
pub struct Aggregator<R> {
    interval: Duration,
    reporter: R,
    accumulator: Arc<Accumulator>,
    result: Arc<Mutex<RunResult>>,
    /// End of the previous window; begin of the next one
    last_tick: DateTime<Utc>,
    ticks: u64,
    phase: Phase,
}

impl<R: Reporter> Aggregator<R> {
    pub fn new(interval: Duration, reporter: R) -> Self {
        let start = Utc::now();
        Self {
            interval,
            reporter,
            accumulator: Arc::new(Accumulator::new()),
            result: Arc::new(Mutex::new(RunResult::new(start))),
            last_tick: start,
            ticks: 0,
            phase: Phase::Running,
        }
    }

    /// Shared handle on the latest computed result.
    pub fn result_handle(&self) -> Arc<Mutex<RunResult>> {
        Arc::clone(&self.result)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Consume both queues until they close, reporting every `interval`,
    /// then flush and report one final time.
    pub async fn run(
        mut self,
        metrics: QueueReceiver<Metric>,
        diagnostics: QueueReceiver<Diagnostic>,
    ) -> AggregateOutcome {
        let mut metrics_task = tokio::spawn(consume_metrics(metrics, Arc::clone(&self.accumulator)));
        let mut diagnostics_task = tokio::spawn(consume_diagnostics(
            diagnostics,
            Arc::clone(&self.accumulator),
        ));
        let mut metrics_open = true;
        let mut diagnostics_open = true;

        // First tick one full interval after start
        let mut interval = time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        while metrics_open || diagnostics_open {
            tokio::select! {
                joined = &mut metrics_task, if metrics_open => {
                    metrics_open = false;
                    self.consumer_finished("metrics", joined);
                }
                joined = &mut diagnostics_task, if diagnostics_open => {
                    diagnostics_open = false;
                    self.consumer_finished("diagnostics", joined);
                }
                Some(_) = ticks.next() => self.tick(false),
            }
        }

        self.enter(Phase::Finalizing);
        self.tick(true);
        self.enter(Phase::Done);

        AggregateOutcome {
            result: self.result.lock().clone(),
            diagnostics: self.accumulator.diagnostics(),
            distribution: self.accumulator.distribution(),
            ticks: self.ticks,
        }
    }

    fn consumer_finished(&mut self, queue: &'static str, joined: Result<u64, JoinError>) {
        match joined {
            Ok(consumed) => debug!(queue, consumed, "queue closed"),
            Err(e) => warn!(queue, error = %e, "consumer task failed"),
        }
        if self.phase == Phase::Running {
            self.enter(Phase::Draining);
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "aggregator phase");
        self.phase = phase;
    }

    /// Snapshot-and-reset the window, fold it into the total, then report.
    ///
    /// The buffer lock and the result lock are taken one after the other,
    /// never together.
    fn tick(&mut self, is_final: bool) {
        let end = Utc::now();
        let snapshot = self.accumulator.flush();

        let mut window_latencies = snapshot.window_latencies;
        let window = Stats {
            begin_time: self.last_tick,
            end_time: end,
            duration_sec: seconds_between(self.last_tick, end),
            counts: snapshot.counts,
            latency: PercentileSet::from_samples(&mut window_latencies),
        };

        let result = {
            let mut result = self.result.lock();
            result.total.counts.merge(&window.counts);
            if snapshot.total_latency.has_data() {
                result.total.latency = snapshot.total_latency;
            }
            result.total.close_at(end);
            result.window = window;
            result.clone()
        };

        self.last_tick = end;
        self.ticks += 1;

        let distribution = if is_final {
            self.accumulator.distribution()
        } else {
            Vec::new()
        };
        let frame = Frame {
            result: &result,
            diagnostics: &snapshot.diagnostics,
            distribution: &distribution,
            is_final,
        };
        let reporter = &mut self.reporter;
        // Rendering may block on a slow terminal; keep the other tasks moving
        match Handle::current().runtime_flavor() {
            RuntimeFlavor::MultiThread => task::block_in_place(|| reporter.render(&frame)),
            _ => reporter.render(&frame),
        }
    }
}

// ─── Consumer tasks ──────────────────────────────────────────────

async fn consume_metrics(queue: QueueReceiver<Metric>, acc: Arc<Accumulator>) -> u64 {
    let mut consumed = 0;
    while let Some(metric) = queue.pop().await {
        acc.record(&metric);
        consumed += 1;
    }
    consumed
}

async fn consume_diagnostics(queue: QueueReceiver<Diagnostic>, acc: Arc<Accumulator>) -> u64 {
    let mut consumed = 0;
    while let Some(diagnostic) = queue.pop().await {
        acc.record_diagnostic(diagnostic.to_string());
        consumed += 1;
    }
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;

    #[derive(Debug, Clone)]
    struct Seen {
        result: RunResult,
        diagnostics: Vec<String>,
        is_final: bool,
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Seen>>>);

    impl Reporter for Recorder {
        fn render(&mut self, frame: &Frame<'_>) {
            self.0.lock().push(Seen {
                result: frame.result.clone(),
                diagnostics: frame.diagnostics.to_vec(),
                is_final: frame.is_final,
            });
        }
    }

    #[tokio::test]
    async fn final_flush_reports_buffered_data() {
        let recorder = Recorder::default();
        let aggregator = Aggregator::new(Duration::from_secs(3600), recorder.clone());
        assert_eq!(aggregator.phase(), Phase::Running);

        let (metric_tx, metric_rx) = queue::bounded(8);
        let (diag_tx, diag_rx) = queue::bounded(8);

        metric_tx.push(Metric::response(200, 5.0)).await.unwrap();
        metric_tx.push(Metric::response(200, 7.0)).await.unwrap();
        metric_tx.push(Metric::transport_error()).await.unwrap();
        diag_tx.push(Diagnostic::error("refused")).await.unwrap();
        diag_tx.push(Diagnostic::error("refused")).await.unwrap();
        drop(metric_tx);
        drop(diag_tx);

        let outcome = aggregator.run(metric_rx, diag_rx).await;

        let frames = recorder.0.lock().clone();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_final);
        assert_eq!(frames[0].diagnostics, vec!["ERROR: refused"]);

        let total = &outcome.result.total;
        assert_eq!(total.counts.success, 2);
        assert_eq!(total.counts.error, 1);
        assert_eq!(total.total_count(), 3);
        assert_eq!(total.counts.status_2xx, 2);
        assert_eq!(total.latency.count, 2);
        assert_eq!(total.latency.min, 5.0);
        assert_eq!(total.latency.max, 7.0);
        assert_eq!(outcome.ticks, 1);
        assert_eq!(outcome.diagnostics.len(), 1);
    }

    /// Blocks the calling thread on every frame, like a stalled terminal.
    #[derive(Clone, Default)]
    struct SlowReporter(Arc<Mutex<u64>>);

    impl Reporter for SlowReporter {
        fn render(&mut self, _frame: &Frame<'_>) {
            std::thread::sleep(Duration::from_millis(40));
            *self.0.lock() += 1;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_reporter_does_not_stall_consumers() {
        let reporter = SlowReporter::default();
        let aggregator = Aggregator::new(Duration::from_millis(10), reporter.clone());

        let (metric_tx, metric_rx) = queue::bounded(2);
        let (diag_tx, diag_rx) = queue::bounded::<Diagnostic>(2);
        drop(diag_tx);

        let producer = tokio::spawn(async move {
            for _ in 0..200 {
                metric_tx.push(Metric::response(200, 1.0)).await.unwrap();
            }
        });

        let outcome = aggregator.run(metric_rx, diag_rx).await;
        producer.await.unwrap();

        assert_eq!(outcome.result.total.counts.success, 200);
        assert_eq!(*reporter.0.lock(), outcome.ticks);
    }

    #[tokio::test]
    async fn empty_run_still_reports_once() {
        let recorder = Recorder::default();
        let aggregator = Aggregator::new(Duration::from_millis(50), recorder.clone());
        let (metric_tx, metric_rx) = queue::bounded::<Metric>(1);
        let (diag_tx, diag_rx) = queue::bounded::<Diagnostic>(1);
        drop(metric_tx);
        drop(diag_tx);

        let outcome = aggregator.run(metric_rx, diag_rx).await;

        assert_eq!(outcome.ticks, 1);
        assert_eq!(outcome.result.total.total_count(), 0);
        assert!(!outcome.result.total.latency.has_data());
        assert!(outcome.distribution.is_empty());
        assert!(recorder.0.lock()[0].is_final);
    }

    #[tokio::test]
    async fn windows_reset_and_totals_grow() {
        let recorder = Recorder::default();
        let aggregator = Aggregator::new(Duration::from_millis(20), recorder.clone());
        let live = aggregator.result_handle();

        let (metric_tx, metric_rx) = queue::bounded(4);
        let (diag_tx, diag_rx) = queue::bounded::<Diagnostic>(4);
        drop(diag_tx);

        let producer = tokio::spawn(async move {
            for i in 0..30u32 {
                let metric = if i % 10 == 9 {
                    Metric::transport_error()
                } else {
                    Metric::response(200, f64::from(i))
                };
                metric_tx.push(metric).await.unwrap();
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        });

        let outcome = aggregator.run(metric_rx, diag_rx).await;
        producer.await.unwrap();

        let frames = recorder.0.lock().clone();
        assert!(frames.len() >= 2, "expected several ticks, got {}", frames.len());

        let mut window_sum = 0;
        let mut previous_total = 0;
        for pair in frames.windows(2) {
            // Consecutive windows tile the timeline.
            assert_eq!(pair[1].result.window.begin_time, pair[0].result.window.end_time);
        }
        for frame in &frames {
            let window = &frame.result.window;
            let total = &frame.result.total;
            assert_eq!(window.total_count(), window.counts.success + window.counts.error);
            assert!(total.total_count() >= previous_total);
            previous_total = total.total_count();
            window_sum += window.total_count();
        }

        assert_eq!(window_sum, 30);
        assert_eq!(outcome.result.total.counts.success, 27);
        assert_eq!(outcome.result.total.counts.error, 3);
        assert_eq!(outcome.result.total.latency.count, 27);
        assert_eq!(*live.lock(), outcome.result);
    }
}
