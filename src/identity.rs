//! Identity & session store.
//!
//! Users live in a map keyed by username; the session index maps a token to
//! the owning username rather than to the user itself. One reader-writer lock
//! covers both maps so a token and its owner are always updated together.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::error::{AppError, Result};
use crate::models::{User, UserInfo};
use crate::security::{self, PasswordParams};

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    /// token -> username
    sessions: HashMap<String, String>,
}

impl Inner {
    /// Drop a user's current session, if any
    fn end_session(&mut self, username: &str) {
        if let Some(user) = self.users.get_mut(username) {
            if !user.session_token.is_empty() {
                self.sessions.remove(&user.session_token);
            }
            user.session_token.clear();
            user.is_online = false;
        }
    }
}

/// Users, credentials, presence and sessions
pub struct IdentityStore {
    inner: RwLock<Inner>,
    session_ttl: Duration,
    password_params: PasswordParams,
}

impl IdentityStore {
    pub fn new(session_ttl: Duration, password_params: PasswordParams) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            session_ttl,
            password_params,
        }
    }

    /// Register a new user
    ///
    /// The username must be 3-20 characters of `[A-Za-z0-9_]`. No session is
    /// created. A failed registration leaves the store untouched.
    pub fn register_user(&self, username: &str, password: &str) -> Result<()> {
        if !User::validate_username(username) {
            return Err(AppError::InvalidUsername);
        }

        // Hashing is deliberately slow, so keep it outside the lock
        if self.inner.read().users.contains_key(username) {
            return Err(AppError::UserAlreadyExists);
        }

        let salt = security::generate_salt()?;
        let password_hash = security::hash_password(password, &salt, self.password_params)?;

        let mut inner = self.inner.write();
        if inner.users.contains_key(username) {
            return Err(AppError::UserAlreadyExists);
        }
        inner.users.insert(
            username.to_string(),
            User::new(username.to_string(), password_hash, salt),
        );

        tracing::info!(user = %username, "New user registered");
        Ok(())
    }

    /// Check a username/password pair
    ///
    /// Returns `UserNotFound` or `InvalidCredentials` on failure.
    pub fn validate_credentials(&self, username: &str, password: &str) -> Result<()> {
        let (salt, stored_hash) = {
            let inner = self.inner.read();
            let user = inner.users.get(username).ok_or(AppError::UserNotFound)?;
            (user.salt.clone(), user.password_hash.clone())
        };

        if security::verify_password(password, &salt, &stored_hash, self.password_params)? {
            Ok(())
        } else {
            Err(AppError::InvalidCredentials)
        }
    }

    /// Issue a new session token, invalidating the user's previous one
    pub fn create_session(&self, username: &str) -> Result<String> {
        let token = security::generate_session_token()?;
        let now = Utc::now();

        let mut inner = self.inner.write();
        let Inner { users, sessions } = &mut *inner;
        let user = users.get_mut(username).ok_or(AppError::UserNotFound)?;

        if !user.session_token.is_empty() {
            sessions.remove(&user.session_token);
        }

        user.session_token = token.clone();
        user.session_expires = now + self.session_ttl;
        user.is_online = true;
        user.last_seen = now;
        sessions.insert(token.clone(), username.to_string());

        Ok(token)
    }

    /// Resolve a token to its username
    ///
    /// Unknown and expired tokens both yield `None`.
    pub fn validate_session(&self, token: &str) -> Option<String> {
        self.validate_session_at(token, Utc::now())
    }

    fn validate_session_at(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        if token.is_empty() {
            return None;
        }

        let inner = self.inner.read();
        let username = inner.sessions.get(token)?;
        let user = inner.users.get(username)?;

        if user.session_token == token && user.has_live_session(now) {
            Some(user.username.clone())
        } else {
            None
        }
    }

    /// Slide a user's session expiry and last-seen forward
    pub fn update_session(&self, username: &str) {
        let now = Utc::now();
        if let Some(user) = self.inner.write().users.get_mut(username) {
            user.session_expires = now + self.session_ttl;
            user.last_seen = now;
        }
    }

    /// End the session identified by `token`
    ///
    /// Returns the username the token belonged to.
    pub fn logout(&self, token: &str) -> Option<String> {
        self.logout_with(token, |_| {})
    }

    /// [`logout`](Self::logout), running `on_end` under the same write lock
    ///
    /// `on_end` may take the connection registry lock, as in
    /// [`transition_presence`](Self::transition_presence).
    pub fn logout_with<F>(&self, token: &str, on_end: F) -> Option<String>
    where
        F: FnOnce(&str),
    {
        let mut inner = self.inner.write();
        let username = inner.sessions.get(token)?.clone();
        inner.end_session(&username);
        on_end(&username);
        Some(username)
    }

    /// Snapshot of every user, in no particular order
    pub fn get_all_users(&self) -> Vec<UserInfo> {
        self.inner.read().users.values().map(User::info).collect()
    }

    pub fn get_user(&self, username: &str) -> Option<UserInfo> {
        self.inner.read().users.get(username).map(User::info)
    }

    pub fn set_online(&self, username: &str, online: bool) {
        if let Some(user) = self.inner.write().users.get_mut(username) {
            user.is_online = online;
            user.last_seen = Utc::now();
        }
    }

    pub fn update_public_key(&self, username: &str, public_key: &str) {
        if let Some(user) = self.inner.write().users.get_mut(username) {
            user.public_key = public_key.to_string();
        }
    }

    /// Run `f` under the identity write lock and apply the presence it returns
    ///
    /// `f` may take the connection registry lock; this is the only place the
    /// two locks nest and the identity lock is always the outer one.
    /// `None` leaves presence unchanged.
    pub fn transition_presence<F>(&self, username: &str, f: F)
    where
        F: FnOnce() -> Option<bool>,
    {
        let mut inner = self.inner.write();
        if let Some(online) = f() {
            if let Some(user) = inner.users.get_mut(username) {
                user.is_online = online;
                user.last_seen = Utc::now();
            }
        }
    }

    /// Log out every expired session
    ///
    /// Returns the usernames whose sessions were dropped.
    pub fn cleanup_sessions(&self) -> Vec<String> {
        self.cleanup_sessions_with(|_| {})
    }

    /// [`cleanup_sessions`](Self::cleanup_sessions), calling `on_end` for each
    /// expired user while the write lock is still held
    pub fn cleanup_sessions_with<F>(&self, on_end: F) -> Vec<String>
    where
        F: FnMut(&str),
    {
        self.cleanup_sessions_at(Utc::now(), on_end)
    }

    fn cleanup_sessions_at<F>(&self, now: DateTime<Utc>, mut on_end: F) -> Vec<String>
    where
        F: FnMut(&str),
    {
        let mut inner = self.inner.write();

        let expired: Vec<String> = inner
            .sessions
            .values()
            .filter(|username| {
                inner
                    .users
                    .get(*username)
                    .map_or(true, |user| !user.has_live_session(now))
            })
            .cloned()
            .collect();

        for username in &expired {
            inner.end_session(username);
            on_end(username);
        }
        // Tokens whose owner vanished can't be reached through end_session
        let Inner { users, sessions } = &mut *inner;
        sessions.retain(|_, username| users.contains_key(username));

        expired
    }

    pub fn user_count(&self) -> usize {
        self.inner.read().users.len()
    }

    pub fn online_count(&self) -> usize {
        self.inner
            .read()
            .users
            .values()
            .filter(|user| user.is_online)
            .count()
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }
}
