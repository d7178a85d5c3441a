use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use json_replay_bench::{config::DEFAULT_URI, pipeline, Cli, TerminalReporter};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the live report
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // ── 1. Validate everything before touching the network ──────
    let config = cli.to_config().context("invalid configuration")?;

    if cli.uses_default_uri() && !cli.yes && !confirm_default_target()? {
        return Ok(());
    }

    // ── 2. Ctrl-C stops producers and workers; stats still flush ──
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight requests");
                cancel.cancel();
            }
        }
    });

    // ── 3. Run ───────────────────────────────────────────────────
    println!("Preparing for shooting...");
    let reporter = TerminalReporter::stdout(cli.plain);
    let summary = pipeline::run(&config, reporter, cancel).await?;

    // ── 4. Optional JSON summary ─────────────────────────────────
    if let Some(path) = &cli.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
        println!("Summary written to {}", path.display());
    }

    println!("Done!");
    Ok(())
}

/// Ask before firing at the built-in default target.
/// Anything but an explicit "n" goes ahead; a closed stdin declines.
fn confirm_default_target() -> Result<bool> {
    print!("Default target '{DEFAULT_URI}' will be used. OK? [y/n] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(0) | Err(_) => Ok(false),
        Ok(_) => Ok(!answer.trim().eq_ignore_ascii_case("n")),
    }
}
