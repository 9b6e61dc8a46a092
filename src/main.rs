use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use session_keeper::config::{load_config, SessionConfig};
use session_keeper::connection::{CloseReason, WsTransport};
use session_keeper::lifecycle::{wait_for_signal, SessionContext, ShutdownOrchestrator};
use session_keeper::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "session-keeper")]
#[command(about = "Keeps one messaging session connected and its credentials durable", long_about = None)]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => SessionConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("session-keeper v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        db_path = %config.store.db_path,
        url = %config.transport.url,
        failure_threshold = config.circuit_breaker.failure_threshold,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let orchestrator = Arc::new(ShutdownOrchestrator::new());
    let transport = Arc::new(WsTransport::from_config(&config.transport));

    let started = SessionContext::build(config, transport, Arc::clone(&orchestrator))
        .and_then(|context| context.start().map(|()| context));
    let context = match started {
        Ok(context) => context,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            let report = orchestrator.shutdown("startup_error").await;
            tracing::info!(%report, "Startup aborted");
            std::process::exit(1);
        }
    };

    let (reason, exit_code) = tokio::select! {
        signal = wait_for_signal() => match signal {
            Ok(signal) => (signal.as_str().to_string(), signal.exit_code()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
                ("signal_error".to_string(), 1)
            }
        },
        closed = context.manager.wait_closed() => {
            let code = match closed {
                CloseReason::Fatal(_) => 1,
                CloseReason::LoggedOut | CloseReason::Shutdown => 0,
            };
            (closed.as_str().to_string(), code)
        }
    };

    let report = tokio::select! {
        report = orchestrator.shutdown(&reason) => report,
        _ = wait_for_signal() => {
            tracing::warn!("Second signal received; exiting without waiting for cleanup");
            std::process::exit(exit_code);
        }
    };
    tracing::info!(%report, "Shutdown complete");

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
