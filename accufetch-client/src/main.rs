//! accufetch - send newline-delimited JSON requests through one batching
//! engine.
//!
//! Each stdin line is one request. Responses are printed as JSON, one per
//! line, in input order.
//!
//! ```bash
//! printf '{"type":"ping"}\n{"type":"ping"}\n' | accufetch --url http://localhost:8000/api/accumulated
//! ```

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use accufetch_client::{connect, ClientConfig};
use accufetch_core::DispatchError;

#[derive(Parser)]
#[command(name = "accufetch")]
#[command(version)]
#[command(about = "Batch JSON requests from stdin into accumulated POSTs", long_about = None)]
struct Cli {
    /// Batch endpoint URL (defaults to ACCUFETCH_URL)
    #[arg(short, long)]
    url: Option<String>,

    /// Read all input before dispatching, so it goes out as one batch
    #[arg(long)]
    paused: bool,

    /// Per-batch HTTP timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("accufetch_client=info,accufetch_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.url {
        config.url = url;
    }
    if let Some(secs) = cli.timeout_secs {
        config.timeout = std::time::Duration::from_secs(secs);
    }
    config.engine.start_interrupted |= cli.paused;

    info!(url = %config.url, paused = config.engine.start_interrupted, "Starting accufetch");

    let (error_tx, mut error_rx) = mpsc::unbounded_channel::<DispatchError>();
    let engine = connect::<Value, Value>(&config, move |err: &DispatchError| {
        let _ = error_tx.send(err.clone());
    })?;

    let mut pending = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = serde_json::from_str(&line)
            .with_context(|| format!("Invalid JSON request on line {}", pending.len() + 1))?;
        pending.push(engine.submit(request));
    }

    if engine.is_interrupted() {
        engine.set_interrupted(false)?;
    }

    for response in pending {
        let response = tokio::select! {
            response = response => response?,
            Some(err) = error_rx.recv() => {
                engine.close();
                anyhow::bail!("Batch dispatch failed: {}", err);
            }
        };
        println!("{}", serde_json::to_string(&response)?);
    }

    let metrics = engine.metrics();
    info!(
        requests = metrics.requests_completed,
        batches = metrics.batches_dispatched,
        avg_batch_size = metrics.avg_batch_size,
        "Done"
    );

    engine.close();
    engine.closed().await;
    Ok(())
}
