use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// Health check endpoint
///
/// Reports liveness plus a few in-memory counters. Used by load balancers
/// and monitoring systems.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "stats": {
            "total_users": state.identity.user_count(),
            "online_users": state.identity.online_count(),
            "connections": state.hub.connected_count(),
            "total_messages": state.log.len(),
            "message_limit": state.log.capacity(),
        },
    }))
}
