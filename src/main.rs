use daily_habits::clock::SystemClock;
use daily_habits::config::{Config, StoreKind};
use daily_habits::storage::{AnyStore, FileStore, MemoryStore};
use daily_habits::{AppState, router};
use std::{net::SocketAddr, sync::Arc};
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env()?;
    let store = match config.store {
        StoreKind::File => {
            fs::create_dir_all(&config.data_dir).await?;
            info!(dir = %config.data_dir.display(), "using file store");
            AnyStore::File(FileStore::new(&config.data_dir))
        }
        StoreKind::Memory => {
            warn!("using in-memory store; data is lost on exit");
            AnyStore::Memory(MemoryStore::new())
        }
    };

    let state = AppState::new(store, Arc::new(SystemClock), config.default_user.clone());
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
