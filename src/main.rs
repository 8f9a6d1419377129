//! compute-session: an accumulator protocol demo over a local stream socket
//!
//! A server accepts connections and keeps one running integer per
//! connection. Each client sends `init`/`add`/`mul`/`div` commands on a fixed
//! tick, then `compute`, and reads back `answer <value>`.
//!
//! Features:
//! - Unix-domain or TCP transport
//! - Any number of concurrently running clients, each with its own schedule
//! - The server is stopped as soon as every client has finished
//! - Configuration via CLI arguments or TOML file

use compute_session::config::{Config, TransportType};
use compute_session::orchestrator::{race, Either, Orchestrator, RunReport};
use compute_session::transport::{TcpTransport, Transport, UnixTransport};
use std::io;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        endpoint = %config.endpoint,
        transport = ?config.transport,
        max_frame_size = config.max_frame_size,
        clients = config.clients.len(),
        "Starting compute-session"
    );

    // Every session shares one thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    if let Some(report) = runtime.block_on(run(&config))? {
        log_report(&report);
    }
    Ok(())
}

/// Run with the configured transport. `None` means a signal stopped the run.
async fn run(config: &Config) -> io::Result<Option<RunReport>> {
    match config.transport {
        TransportType::Unix => {
            let transport = UnixTransport::new(&config.endpoint);
            let result = run_until_signal(transport.clone(), config).await;
            if let Err(e) = std::fs::remove_file(transport.path()) {
                warn!(error = %e, "Failed to remove socket file");
            }
            result
        }
        TransportType::Tcp => run_until_signal(TcpTransport::new(&config.endpoint), config).await,
    }
}

async fn run_until_signal<T: Transport>(
    transport: T,
    config: &Config,
) -> io::Result<Option<RunReport>> {
    let orchestrator = Orchestrator::new(transport, config.clients.clone(), config.max_frame_size);

    match race(orchestrator.run(), shutdown_signal()).await {
        Either::Left(report) => report.map(Some),
        Either::Right(signal) => {
            signal?;
            info!("Shutdown signal received");
            Ok(None)
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> io::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

fn log_report(report: &RunReport) {
    for client in &report.clients {
        match &client.result {
            Ok(answer) => info!(client = client.id, value = answer.value, "Client finished"),
            Err(e) => warn!(client = client.id, error = %e, "Client failed"),
        }
    }
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "All clients finished"
    );
}
