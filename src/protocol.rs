//! WebSocket wire format.
//!
//! Every frame is a JSON object discriminated by its `type` field. Relayed
//! chat frames share one [`Envelope`] shape whose `content`, `iv`,
//! `auth_tag` and `key_id` fields are carried verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{USER_JOINED_MESSAGE, USER_LEFT_MESSAGE};
use crate::models::UserInfo;

/// Payload shared by chat, typing, history and presence frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recipient: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iv: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// A single WebSocket frame
///
/// Client to server: `auth`, `general`, `private`, `typing`, `ping`.
/// Server to client: everything else, plus relayed `general`/`private`/`typing`.
/// Unrecognised `type` values decode as [`Frame::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Auth {
        #[serde(default)]
        session_token: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        public_key: String,
    },
    General(Envelope),
    Private(Envelope),
    Typing(Envelope),
    History(Envelope),
    UserJoined(Envelope),
    UserLeft(Envelope),
    UsersList {
        users: Vec<UserInfo>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    Success {
        content: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    Error {
        content: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    Ping {
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    Pong {
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    #[serde(other)]
    Unknown,
}

impl Frame {
    pub fn success(content: impl Into<String>) -> Self {
        Frame::Success {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Frame::Error {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user_joined(username: &str) -> Self {
        Frame::UserJoined(presence(username, USER_JOINED_MESSAGE))
    }

    pub fn user_left(username: &str) -> Self {
        Frame::UserLeft(presence(username, USER_LEFT_MESSAGE))
    }

    pub fn users_list(users: Vec<UserInfo>) -> Self {
        Frame::UsersList {
            users,
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        Frame::Pong {
            timestamp: Utc::now(),
        }
    }

    /// Wire name of this frame's `type`
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Auth { .. } => "auth",
            Frame::General(_) => "general",
            Frame::Private(_) => "private",
            Frame::Typing(_) => "typing",
            Frame::History(_) => "history",
            Frame::UserJoined(_) => "user_joined",
            Frame::UserLeft(_) => "user_left",
            Frame::UsersList { .. } => "users_list",
            Frame::Success { .. } => "success",
            Frame::Error { .. } => "error",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
            Frame::Unknown => "unknown",
        }
    }

    /// Serialize to the JSON text sent over the socket
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a text frame received from a client
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

fn presence(username: &str, content: &str) -> Envelope {
    Envelope {
        sender: username.to_string(),
        content: content.to_string(),
        timestamp: Utc::now(),
        ..Envelope::default()
    }
}
