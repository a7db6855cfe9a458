use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use deployknot::config::Config;
use deployknot::remote::RusshExecutor;
use deployknot::store::{self, AppState};
use deployknot::worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(config.tracing_filter()).unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let pool = store::pool::connect(&config.database_url).await?;
    let valkey = store::valkey::connect(&config.redis_url()).await?;

    let state = AppState {
        pool,
        valkey,
        config: Arc::new(config),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let executor: Arc<dyn deployknot::remote::RemoteExecutor> = Arc::new(RusshExecutor);

    let run_handle = tokio::spawn(worker::run(state.clone(), executor, shutdown_rx.clone()));
    let reconcile_handle = tokio::spawn(worker::reconcile(state, shutdown_rx));

    shutdown_signal().await;
    tracing::info!("deployknot-worker shutting down");
    let _ = shutdown_tx.send(());

    let _ = tokio::join!(run_handle, reconcile_handle);
    tracing::info!("deployknot-worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
