//! HTTP surface
//!
//! Thin axum layer over [`ChatResponseService`](crate::service::ChatResponseService).

pub mod chat;
pub mod health;
pub mod state;

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

pub use state::AppState;

fn routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat::handle_chat))
        .route("/health", get(health::handle_health))
}

/// Create the API router with all routes.
///
/// Routes are served at the root and again under `/api`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes())
        .nest("/api", routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server.
pub async fn run_server(state: AppState, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
