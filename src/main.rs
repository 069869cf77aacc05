//! EdgeChat - chat server for a small local LLM on edge hardware

use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use edgechat::api::{run_server, AppState};
use edgechat::config::load_settings;
use edgechat::inference::LlamaEngine;
use edgechat::service::ChatResponseService;
use edgechat::system;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("edgechat=info".parse()?))
        .init();

    info!("Starting EdgeChat v{}", env!("CARGO_PKG_VERSION"));

    let settings = load_settings(None);

    // Both touch the filesystem and may block
    let accelerated = tokio::task::spawn_blocking(system::probe).await?;
    let model = {
        let path = settings.model_path.clone();
        let runtime = settings.runtime.clone();
        tokio::task::spawn_blocking(move || LlamaEngine::initialize(&path, accelerated, &runtime)).await?
    };
    info!(
        "Model state: {:?}, accelerator: {}, deadline: {:?}",
        model,
        accelerated,
        settings.deadline()
    );

    let service = ChatResponseService::new(model, accelerated, &settings);
    let state = AppState::new(service, settings.model_type.clone());

    let addr: SocketAddr = settings.bind_addr().parse()?;
    info!("Starting server on port {}", settings.port);

    run_server(state, addr).await
}
