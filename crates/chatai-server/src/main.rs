mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use chatai_api::cache::{self, ConversationCache};
use chatai_api::{AppState, AppStateInner, AuthSettings};
use chatai_db::Database;
use chatai_llm::OpenRouterClient;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatai=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Database::open(&config.db_path)?;

    // Conversation cache plus its background sweep
    let cache = ConversationCache::new(cache::DEFAULT_TTL);
    tokio::spawn(cache::run_sweep_loop(cache.clone(), cache::DEFAULT_SWEEP_INTERVAL));

    let provider = OpenRouterClient::new(&config.openrouter_url, &config.openrouter_api_key);

    let state: AppState = Arc::new(AppStateInner {
        db,
        cache,
        provider: Arc::new(provider),
        auth: AuthSettings {
            jwt_secret: config.jwt_secret.clone(),
            token_ttl: chrono::Duration::days(config.token_ttl_days),
            expose_otp: config.expose_otp,
        },
    });

    let mut app = chatai_api::router(state);
    if let Some(dir) = &config.static_dir {
        info!("Serving client bundle from {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir));
    }

    let app = app
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("chatai server listening on {}", addr);
    if config.expose_otp {
        info!("Sign-in passcodes are returned in API responses (CHATAI_EXPOSE_OTP)");
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
