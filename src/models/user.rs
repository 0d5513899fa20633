use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_USERNAME_LEN, MIN_USERNAME_LEN};

/// User record held by the identity store
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    /// base64 of the derived password hash
    pub password_hash: String,
    /// base64 of 16 random bytes
    pub salt: String,
    /// Opaque, client supplied, may be empty
    pub public_key: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub joined_at: DateTime<Utc>,
    /// Empty when the user has no active session
    pub session_token: String,
    pub session_expires: DateTime<Utc>,
}

impl User {
    /// Create a freshly registered user with no session
    pub fn new(username: String, password_hash: String, salt: String) -> Self {
        let now = Utc::now();
        Self {
            username,
            password_hash,
            salt,
            public_key: String::new(),
            is_online: false,
            last_seen: now,
            joined_at: now,
            session_token: String::new(),
            session_expires: now,
        }
    }

    /// Validate username shape: 3-20 characters from `[A-Za-z0-9_]`
    pub fn validate_username(username: &str) -> bool {
        (MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username.len())
            && username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// Whether the session is live at `now`
    pub fn has_live_session(&self, now: DateTime<Utc>) -> bool {
        !self.session_token.is_empty() && now < self.session_expires
    }

    /// Public view of this user
    pub fn info(&self) -> UserInfo {
        UserInfo {
            username: self.username.clone(),
            public_key: self.public_key.clone(),
            is_online: self.is_online,
            last_seen: self.last_seen,
            joined_at: self.joined_at,
        }
    }
}

/// User model for API responses and roster frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_key: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub joined_at: DateTime<Utc>,
}
