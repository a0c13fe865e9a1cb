use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ApiConfig;
use crate::errors::FleetError;
use crate::tasks::Executor;

use super::routes::build_router;

/// Serve the job API until `shutdown` resolves
pub async fn start_api_server<F>(config: &ApiConfig, executor: Executor, shutdown: F) -> crate::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| FleetError::config(format!("Invalid API address: {}", e)))?;

    let router: Router = build_router(executor);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| FleetError::transport(format!("Failed to bind API server: {}", e)))?;

    info!(address = %addr, "Starting HTTP API server");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| FleetError::transport(format!("API server error: {}", e)))?;

    info!("API server shutdown completed");
    Ok(())
}
