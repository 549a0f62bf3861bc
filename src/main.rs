//! Tributary forwarder.
//!
//! Reads newline-delimited JSON from stdin, delivers it in batches to the
//! configured collector, and prints the final pipeline counters as JSON.

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing::{info, warn};
use tributary::{config::Config, ingest};
use tributary_delivery::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config.log);

    info!(
        sink = ?config.sink,
        endpoint = %config.endpoint_url(),
        credential = %config.credential_masked(),
        concurrency = config.concurrency,
        queue_capacity = config.queue_capacity,
        "Configuration loaded"
    );

    let transport = config.build_transport()?;
    let pipeline = Pipeline::start(transport, config.to_pipeline_config())
        .context("Failed to start delivery pipeline")?;

    let stdin = BufReader::new(tokio::io::stdin());
    let ingested = ingest::submit_lines(stdin, &pipeline.handle(), shutdown_signal()).await;

    info!("Input finished, draining pipeline");
    let stats = pipeline.shutdown().await.context("Pipeline shutdown failed")?;

    let summary = ingested?;
    if summary.skipped > 0 {
        warn!(skipped = summary.skipped, "some input lines were not valid JSON");
    }

    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

/// Initializes tracing on stderr; `RUST_LOG` overrides the configured filter.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, stopping input"),
        () = terminate => info!("Received SIGTERM, stopping input"),
    }
}
