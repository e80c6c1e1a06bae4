use anyhow::{Context, Result};
use lib_sentinel::{init_logging, StateManager, StateManagerConfig, TransportConnector};
use tokio::signal;

mod monitor_logic;
use monitor_logic::{config, display};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    let _log_guard = init_logging("sentinel_monitor", &config.logger_options())
        .context("failed to initialize logging")?;

    let state = StateManager::new(StateManagerConfig::default());
    let connector = TransportConnector::new(state.clone(), config.connector_options())
        .context("invalid connector configuration")?;

    let subscription = connector.subscribe(|snapshot| {
        println!("{}", display::summary_line(snapshot));
    });
    tracing::info!(
        push = ?config.push_url,
        pull = ?config.pull_url,
        "sentinel monitor running"
    );

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        tracing::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    subscription.unsubscribe();
    connector.disconnect();
    if let Some(err) = connector.get_last_error() {
        tracing::info!(error = %err, "last transport error");
    }
    let stats = state.stats();
    tracing::info!(
        flushes = stats.flush_count,
        rejected = stats.rejected_updates,
        "shutdown complete"
    );
    state.cleanup();
    Ok(())
}
