use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use secure_messenger_server::{build_router, hub, AppState, Config};

/// Accounts created when `SEED_DEMO_USERS=true`
const DEMO_USERS: [(&str, &str); 2] = [("demo", "demo123"), ("test", "test123")];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secure_messenger_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Secure Messenger Server...");

    // Load configuration
    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        "Environment: {}, Server: {}",
        config.environment,
        config.server_address()
    );

    let state = AppState::new(config.clone());

    if config.seed_demo_users {
        let identity = state.identity.clone();
        tokio::task::spawn_blocking(move || {
            for (username, password) in DEMO_USERS {
                if let Err(e) = identity.register_user(username, password) {
                    tracing::warn!("Could not seed demo user {}: {}", username, e);
                }
            }
        })
        .await?;
        tracing::info!("Demo users seeded");
    }

    let sweep = hub::spawn_session_sweep(state.hub.clone(), config.sweep_interval());

    let app = build_router(state);

    // Start server
    let addr: SocketAddr = tokio::net::lookup_host(config.server_address())
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Could not resolve {}", config.server_address()))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Server listening on {}", listener.local_addr()?);
    tracing::info!("Open in browser: http://{}:{}", config.public_host, config.server_port);
    tracing::info!("WebSocket: ws://{}:{}/ws", config.public_host, config.server_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep.abort();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {:?}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
