use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{Envelope, Frame};

/// Kinds of message that are kept in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    General,
    Private,
}

/// Message record stored in the in-memory log
///
/// `content`, `iv`, `auth_tag` and `key_id` are opaque to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender: String,
    /// A username, or "all" for general messages
    pub recipient: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iv: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_id: String,
    pub encrypted: bool,
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    /// Build a record from a relayed envelope
    pub fn from_envelope(kind: MessageKind, envelope: &Envelope) -> Self {
        Self {
            id: envelope.id.clone(),
            kind,
            sender: envelope.sender.clone(),
            recipient: envelope.recipient.clone(),
            content: envelope.content.clone(),
            iv: envelope.iv.clone(),
            auth_tag: envelope.auth_tag.clone(),
            key_id: envelope.key_id.clone(),
            encrypted: !envelope.iv.is_empty() || !envelope.auth_tag.is_empty(),
            timestamp: envelope.timestamp,
        }
    }

    /// Whether `username` may see this record in its history
    pub fn visible_to(&self, username: &str) -> bool {
        self.recipient == crate::constants::BROADCAST_RECIPIENT
            || self.recipient == username
            || self.sender == username
    }

    /// Replay frame for a connecting user
    pub fn to_history_frame(&self) -> Frame {
        Frame::History(Envelope {
            id: self.id.clone(),
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            content: self.content.clone(),
            iv: self.iv.clone(),
            auth_tag: self.auth_tag.clone(),
            key_id: self.key_id.clone(),
            timestamp: self.timestamp,
        })
    }
}
