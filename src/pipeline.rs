//! Wires the stages together:
//!
//! ```text
//! LineSource ×files ─► dispatch ─► Worker ×N ─► metrics / diagnostics ─► Aggregator ─► Reporter
//! ```
//!
//! Each queue closes when the last of its producers finishes, so every
//! stage learns about end-of-work from the stage before it.

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, RunConfig};
use crate::load_generator::{Target, WorkerPool};
use crate::metrics::{Aggregator, Diagnostic, DistBucket, Metric, RunResult};
use crate::queue;
use crate::report::Reporter;
use crate::source::{LineSource, SourceReport};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("aggregator task failed: {0}")]
    Aggregator(#[from] JoinError),
}

/// Final state of a run, as written by `--summary`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub target: String,
    pub cancelled: bool,
    /// Requests issued by the worker pool
    pub requests: u64,
    pub result: RunResult,
    pub sources: Vec<SourceReport>,
    pub diagnostics: Vec<String>,
    pub distribution: Vec<DistBucket>,
}

/// Run the whole pipeline to completion (or cancellation) and return the
/// final statistics. Only configuration problems make this fail; every
/// per-line and per-request problem ends up in the report instead.
pub async fn run<R>(
    config: &RunConfig,
    reporter: R,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError>
where
    R: Reporter + 'static,
{
    config.validate()?;
    let target = Target::new(config.target.clone())?;
    let run_id = Uuid::new_v4();

    info!(
        %run_id,
        target = %config.target,
        files = config.files.len(),
        workers = config.workers,
        repeat = config.repeat,
        "starting run"
    );

    let (payload_tx, payload_rx) = queue::bounded::<String>(config.dispatch_capacity());
    let (metric_tx, metric_rx) = queue::bounded::<Metric>(config.metrics_capacity());
    let (diag_tx, diag_rx) = queue::bounded::<Diagnostic>(config.diagnostics_capacity());

    // ── Aggregator first, so nothing upstream blocks on a full queue ──
    let aggregator = Aggregator::new(config.report_interval, reporter);
    let aggregate = tokio::spawn(aggregator.run(metric_rx, diag_rx));

    let start = Diagnostic::info(format!(
        "Start shooting {} file(s) at {}",
        config.files.len(),
        config.target
    ));
    if diag_tx.push(start).await.is_err() {
        debug!("diagnostics queue closed");
    }

    // ── Line sources ────────────────────────────────────────────
    let sources: Vec<_> = config
        .files
        .iter()
        .map(|path| {
            let source = LineSource::new(path.clone(), config.repeat);
            tokio::spawn(source.run(payload_tx.clone(), diag_tx.clone(), cancel.clone()))
        })
        .collect();
    // The dispatch queue closes when the last source drops its handle
    drop(payload_tx);

    // ── Worker pool ─────────────────────────────────────────────
    let pool = WorkerPool::new(target, config.workers, config.pacing);
    let workers = tokio::spawn(pool.run(payload_rx, metric_tx, diag_tx, cancel.clone()));

    let mut reports = Vec::with_capacity(sources.len());
    for handle in sources {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => warn!(error = %e, "line source task failed"),
        }
    }

    let requests = match workers.await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "worker pool task failed");
            0
        }
    };

    let outcome = aggregate.await?;

    info!(
        %run_id,
        requests,
        success = outcome.result.total.counts.success,
        errors = outcome.result.total.counts.error,
        "run finished"
    );

    Ok(RunSummary {
        run_id,
        target: config.target.to_string(),
        cancelled: cancel.is_cancelled(),
        requests,
        result: outcome.result,
        sources: reports,
        diagnostics: outcome.diagnostics,
        distribution: outcome.distribution,
    })
}
