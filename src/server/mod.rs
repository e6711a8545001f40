//! memkv HTTP server.
//!
//! Provides an async `run` function that serves the HTTP surface on a bound
//! listener until the `shutdown` future completes, then performs the final
//! persistence flush.

use std::future::Future;
use std::sync::Arc;

use log::info;
use tokio::net::TcpListener;
use tokio::time::{self, Duration, Instant};

use crate::broker::Broker;
use crate::config::DbConfig;
use crate::consts::SHUTDOWN_MIN_WAIT_SECS;
use crate::error::MemKvServerError;
use crate::server::metrics::Metrics;
use crate::server::routes::AppState;
use crate::storage::db::DbDropGuard;

mod metrics;
mod middleware;
mod routes;

/// Run the memkv server.
///
/// Constructs the database from `config` (loading initial data, which can
/// fail fatally), then serves connections from the supplied listener until
/// the `shutdown` future completes. `tokio::signal::ctrl_c()` can be used as
/// the `shutdown` argument to listen for SIGINT.
///
/// When shutdown begins the server stops accepting connections and waits for
/// in-flight handlers to return; subscribe streams are cut by their
/// connections closing. Once all handlers have returned, the database
/// shutdown hook flushes the AOF and writes a final snapshot, and a minimum
/// shutdown window of one second is enforced.
pub async fn run(
    listener: TcpListener,
    config: DbConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), MemKvServerError> {
    let db_holder = DbDropGuard::new(config)?;
    let db = db_holder.db();

    let state = AppState {
        db: db.clone(),
        broker: Broker::new(),
        metrics: Arc::new(Metrics::new()),
    };
    let app = routes::router(state);

    info!(
        "memkv server started, listening on: {}",
        listener.local_addr()?
    );
    info!("database config: {:?}", db.config());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    // All handlers have returned; flush persistence. The process stays up
    // for the minimum shutdown window even when the flush is instant.
    info!("server is shutting down");
    let started = Instant::now();
    db.shutdown();

    let floor = Duration::from_secs(SHUTDOWN_MIN_WAIT_SECS);
    if let Some(remaining) = floor.checked_sub(started.elapsed()) {
        time::sleep(remaining).await;
    }

    info!("shutdown complete");
    Ok(())
}
