use axum::{extract::State, http::HeaderMap, Json};
use axum_extra::extract::cookie::CookieJar;

use crate::error::Result;
use crate::models::MessageRecord;
use crate::routes::session::require_session;
use crate::AppState;

/// Logged messages visible to the caller, oldest first
pub async fn get_history(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<Vec<MessageRecord>>> {
    let username = require_session(&state, &jar, &headers)?;
    Ok(Json(state.log.history_for(&username)))
}
