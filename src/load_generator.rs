use std::error::Error as _;
use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ConfigError;
use crate::metrics::{Diagnostic, Metric};
use crate::queue::{QueueReceiver, QueueSender};

/// Upper bound on a single request, connect through response headers.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Idle keep-alive connections kept per host.
pub const MAX_IDLE_PER_HOST: usize = 256;

// ─── Target ──────────────────────────────────────────────────────

/// The endpoint every payload is posted to, plus the pooled client.
///
/// `Client` is cheaply cloneable. Every clone shares the same connection
/// pool, so all workers reuse the same keep-alive connections.
#[derive(Debug, Clone)]
pub struct Target {
    client: Client,
    uri: Url,
}

impl Target {
    pub fn new(uri: Url) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self { client, uri })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// POST one payload and time it up to the response headers.
    /// The body is read chunk by chunk and thrown away.
    pub async fn fire(&self, payload: String) -> Result<Metric, reqwest::Error> {
        let t0 = Instant::now();

        let mut response = self
            .client
            .post(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;
        let latency_ms = t0.elapsed().as_secs_f64() * 1_000.0;
        let status = response.status().as_u16();

        // Drain so the connection goes back to the pool
        while let Ok(Some(_)) = response.chunk().await {}

        Ok(Metric::response(status, latency_ms))
    }
}

// ─── Worker pool ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WorkerPool {
    target: Target,
    workers: usize,
    /// Pause each worker takes between its own requests
    pacing: Duration,
}

impl WorkerPool {
    pub fn new(target: Target, workers: usize, pacing: Duration) -> Self {
        Self {
            target,
            workers: workers.max(1),
            pacing,
        }
    }

    /// Spawns `workers` Tokio tasks that drain the dispatch queue until it
    /// closes or `cancel` fires. Returns the number of requests issued.
    ///
    /// The metrics and diagnostics queues close once every worker has exited.
    pub async fn run(
        self,
        payloads: QueueReceiver<String>,
        metrics: QueueSender<Metric>,
        diagnostics: QueueSender<Diagnostic>,
        cancel: CancellationToken,
    ) -> u64 {
        let mut handles = Vec::with_capacity(self.workers);

        for worker_id in 0..self.workers {
            let ctx = WorkerCtx {
                id: worker_id,
                target: self.target.clone(),
                pacing: self.pacing,
                payloads: payloads.clone(),
                metrics: metrics.clone(),
                diagnostics: diagnostics.clone(),
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(worker(ctx)));
        }

        // Only the workers hold producer handles from here on
        drop(metrics);
        drop(diagnostics);

        let mut issued = 0;
        for h in handles {
            match h.await {
                Ok(n) => issued += n,
                Err(e) => debug!(error = %e, "worker task failed"),
            }
        }
        issued
    }
}

// ─── Worker loop ─────────────────────────────────────────────────

struct WorkerCtx {
    id: usize,
    target: Target,
    pacing: Duration,
    payloads: QueueReceiver<String>,
    metrics: QueueSender<Metric>,
    diagnostics: QueueSender<Diagnostic>,
    cancel: CancellationToken,
}

async fn worker(ctx: WorkerCtx) -> u64 {
    let mut issued = 0;

    loop {
        let payload = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            next = ctx.payloads.pop() => match next {
                Some(payload) => payload,
                None => break,
            },
        };

        // Pause between consecutive requests only, never after the last one
        if issued > 0 && !ctx.pacing.is_zero() {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(ctx.pacing) => {}
            }
        }

        // In-flight requests are never cut short by cancellation
        let metric = match ctx.target.fire(payload).await {
            Ok(metric) => metric,
            Err(e) => {
                debug!(worker = ctx.id, error = %e, "request failed");
                let diagnostic = Diagnostic::error(format!(
                    "Request to {} failed: {}",
                    ctx.target.uri(),
                    error_chain(&e)
                ));
                if ctx.diagnostics.push(diagnostic).await.is_err() {
                    debug!(worker = ctx.id, "diagnostics queue closed");
                }
                Metric::transport_error()
            }
        };
        issued += 1;

        if ctx.metrics.push(metric).await.is_err() {
            break;
        }
    }

    debug!(worker = ctx.id, issued, "worker finished");
    issued
}

/// `outer: cause: root cause`, the way the error's source chain reads.
fn error_chain(e: &reqwest::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
