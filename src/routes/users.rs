use axum::{extract::State, http::HeaderMap, Json};
use axum_extra::extract::cookie::CookieJar;

use crate::error::Result;
use crate::models::UserInfo;
use crate::routes::session::require_session;
use crate::AppState;

/// Snapshot of every registered user
pub async fn list_users(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<Vec<UserInfo>>> {
    require_session(&state, &jar, &headers)?;
    Ok(Json(state.identity.get_all_users()))
}
