use axum::{extract::State, http::HeaderMap, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;

use crate::constants::{SESSION_COOKIE, SESSION_HEADER};
use crate::error::{AppError, Result};
use crate::AppState;

/// Session token from the `session_token` cookie, else the `X-Session-Token` header
pub fn session_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Resolve the caller's session or fail with 401
pub fn require_session(state: &AppState, jar: &CookieJar, headers: &HeaderMap) -> Result<String> {
    session_token(jar, headers)
        .and_then(|token| state.identity.validate_session(&token))
        .ok_or(AppError::Unauthorized)
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub username: String,
}

/// Report whether the caller holds a live session
///
/// Always 200. A valid session has its expiry slid forward.
pub async fn validate_session(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Json<ValidateResponse> {
    let username = session_token(&jar, &headers)
        .and_then(|token| state.identity.validate_session(&token));

    match username {
        Some(username) => {
            state.identity.update_session(&username);
            Json(ValidateResponse {
                valid: true,
                username,
            })
        }
        None => Json(ValidateResponse {
            valid: false,
            username: String::new(),
        }),
    }
}
