//! Main Entrypoint for the HomeVise API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Constructing the model client and shared services.
//! 4. Building the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use homevise_api::{
    catalog::ListingCatalog,
    config::Config,
    leads::LeadBook,
    router::create_router,
    state::{AppState, DEFAULT_SYSTEM_PROMPT},
};
use homevise_core::model::GenerativeClient;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Loads the advisor persona, preferring the configured file.
fn load_system_prompt(config: &Config) -> anyhow::Result<String> {
    match &config.system_prompt_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt from {}", path.display())),
        None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let system_prompt = Arc::new(load_system_prompt(&config)?);
    let model_client = Arc::new(GenerativeClient::new(
        config.gemini_api_key.clone(),
        config.chat_model.clone(),
    ));

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        model_client,
        system_prompt,
        leads: Arc::new(LeadBook::new()),
        catalog: Arc::new(ListingCatalog::seeded()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        chat_model = %config.chat_model,
        live_model = %config.live_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
