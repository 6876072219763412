//! Frontdesk API server

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use frontdesk_api::{
    assistant::{AnthropicBackend, AssistantSettings},
    auth::JwtVerifier,
    realtime::{AccessPolicy, ChatHub},
    routes::create_router,
    store::PgChatStore,
    AppState, Config,
};
use frontdesk_shared::{create_pool, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let store = Arc::new(PgChatStore::new(pool.clone()));
    let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));
    let mut hub = ChatHub::new(
        store,
        verifier,
        AccessPolicy::new(config.support_roles.iter().cloned()),
    );

    match &config.assistant_api_key {
        Some(api_key) => {
            let backend = AnthropicBackend::new(
                config.assistant_api_url.clone(),
                api_key.clone(),
                config.assistant_model.clone(),
                config.assistant_timeout(),
            )
            .context("Failed to build assistant client")?;
            let settings = AssistantSettings {
                max_tokens: config.assistant_max_tokens,
                timeout: config.assistant_timeout(),
                staff_activity_window: config.staff_activity_window(),
            };
            hub = hub.with_assistant(Arc::new(backend), settings);
            tracing::info!(model = %config.assistant_model, "Assistant enabled");
        }
        None => tracing::info!("ASSISTANT_API_KEY not set, assistant disabled"),
    }

    let state = AppState::new(Arc::new(hub), Some(pool));
    let app = create_router(state);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "Frontdesk API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Plain text logs by default, JSON lines when `LOG_FORMAT=json`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("frontdesk_api=info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
