//! HTTP API for operating the watch pipeline.
//!
//! Read-only listings plus a manual trigger endpoint. Configuration
//! writes stay in the CLI; entity, event, and delivery state is only
//! ever mutated by the pipeline itself.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::repository::DbContext;
use crate::scheduler::RunExecutor;

/// Shared state for the API server.
#[derive(Clone)]
pub struct AppState {
    pub db: DbContext,
    pub executor: Arc<RunExecutor>,
}

/// Start the API server on the given address.
pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr: SocketAddr = addr.parse()?;
    tracing::info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
