//! Secure Messenger Server Library
//!
//! This module exports the core types and functions for testing and reuse.

pub mod config;
pub mod constants;
pub mod error;
pub mod hub;
pub mod identity;
pub mod message_log;
pub mod models;
pub mod protocol;
pub mod routes;
pub mod security;

pub use config::Config;
pub use error::{AppError, Result};
pub use hub::Hub;
pub use identity::IdentityStore;
pub use message_log::MessageLog;

use std::sync::Arc;

use axum::{
    http::{HeaderName, Method},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use constants::SESSION_HEADER;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<IdentityStore>,
    pub log: Arc<MessageLog>,
    pub hub: Arc<Hub>,
    pub config: Config,
}

impl AppState {
    /// Create empty stores and a hub sized from the configuration
    pub fn new(config: Config) -> Self {
        let identity = Arc::new(IdentityStore::new(
            config.session_ttl(),
            config.password_params(),
        ));
        let log = Arc::new(MessageLog::new(config.history_limit));
        let hub = Arc::new(Hub::new(
            identity.clone(),
            log.clone(),
            config.outbound_queue_capacity,
            config.send_timeout(),
        ));

        Self {
            identity,
            log,
            hub,
            config,
        }
    }
}

/// Build the application router with CORS and request tracing
pub fn build_router(state: AppState) -> Router {
    let origins = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect::<Vec<_>>();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/register", post(routes::register_user))
        .route("/api/login", post(routes::login_user))
        .route("/api/validate", get(routes::validate_session))
        .route("/api/users", get(routes::list_users))
        .route("/api/history", get(routes::get_history))
        .route("/logout", get(routes::logout_user))
        .route("/ws", get(routes::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
