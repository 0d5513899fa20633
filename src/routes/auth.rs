use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};

use crate::constants::{
    ERR_MISSING_CREDENTIALS, ERR_PASSWORD_TOO_SHORT, MIN_PASSWORD_LEN, SESSION_COOKIE,
};
use crate::error::{AppError, Result};
use crate::models::User;
use crate::routes::session::session_token;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub username: String,
    #[serde(rename = "sessionToken")]
    pub session_token: String,
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .max_age(time::Duration::seconds(state.config.session_ttl_secs))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(state.config.secure_cookies)
        .build()
}

/// Register a new user and sign them in
///
/// Returns 400 for missing fields, a badly shaped username, a short
/// password, or a taken username. On success the session token is both
/// returned and set as the `session_token` cookie.
pub async fn register_user(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<Credentials>,
) -> Result<(CookieJar, Json<AuthResponse>)> {
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(AppError::InvalidInput(ERR_MISSING_CREDENTIALS.to_string()));
    }
    if !User::validate_username(&payload.username) {
        tracing::warn!("Rejected username shape: {:?}", payload.username);
        return Err(AppError::InvalidUsername);
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidInput(ERR_PASSWORD_TOO_SHORT.to_string()));
    }

    let identity = state.identity.clone();
    let username = payload.username.clone();

    // Argon2 is CPU bound
    let token = tokio::task::spawn_blocking(move || {
        identity.register_user(&username, &payload.password)?;
        identity.create_session(&username)
    })
    .await??;

    let jar = jar.add(session_cookie(&state, token.clone()));
    Ok((
        jar,
        Json(AuthResponse {
            success: true,
            message: "Registration successful".to_string(),
            username: payload.username,
            session_token: token,
        }),
    ))
}

/// Exchange a username and password for a session
///
/// Unknown users and wrong passwords both yield 401.
pub async fn login_user(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<Credentials>,
) -> Result<(CookieJar, Json<AuthResponse>)> {
    let identity = state.identity.clone();
    let username = payload.username.clone();

    let token = tokio::task::spawn_blocking(move || {
        identity.validate_credentials(&username, &payload.password)?;
        identity.create_session(&username)
    })
    .await??;

    tracing::info!(user = %payload.username, "User logged in");

    let jar = jar.add(session_cookie(&state, token.clone()));
    Ok((
        jar,
        Json(AuthResponse {
            success: true,
            message: "Login successful".to_string(),
            username: payload.username,
            session_token: token,
        }),
    ))
}

/// End the caller's session, close their socket, drop the cookie and redirect home
pub async fn logout_user(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(token) = session_token(&jar, &headers) {
        if let Some(username) = state.hub.logout(&token).await {
            tracing::info!(user = %username, "User logged out");
        }
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (StatusCode::FOUND, jar, [(header::LOCATION, "/")])
}
