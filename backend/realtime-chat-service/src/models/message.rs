//! Message and delivery-status data structures
//!
//! Delivery status has a natural ordering: Sent < Delivered < Seen.
//! A stored status is only ever upgraded, never moved backward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Persisted, recipient offline
    Sent = 0,
    /// Recipient had a live connection when the message was stored
    Delivered = 1,
    /// Recipient was viewing the chat (terminal)
    Seen = 2,
}

impl MessageStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "seen" => Some(Self::Seen),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }

    /// Returns the status after applying `next`. Never regresses.
    pub fn upgrade(self, next: MessageStatus) -> MessageStatus {
        self.max(next)
    }

    pub fn is_terminal(&self) -> bool {
        *self == MessageStatus::Seen
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(s).ok_or_else(|| format!("Invalid message status: {}", s))
    }
}

/// Message row as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Insert form of a message; the store assigns id-independent fields
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub status: MessageStatus,
}

impl NewMessage {
    pub fn new(
        chat_id: Uuid,
        sender_id: Uuid,
        text: Option<String>,
        image_url: Option<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            text,
            image_url,
            status,
        }
    }

    /// Wire size used for throughput accounting (images count as 100 bytes)
    pub fn approximate_size(&self) -> u64 {
        let text = self.text.as_ref().map(|t| t.len() as u64).unwrap_or(0);
        let image = if self.image_url.is_some() { 100 } else { 0 };
        text + image
    }
}

/// Client-facing message shape shared by `receive_message` and
/// `receive_message_global`, so both carry the same identity and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender: Uuid,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessagePayload {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            chat_id: message.chat_id,
            sender: message.sender_id,
            text: message.text.clone(),
            image_url: message.image_url.clone(),
            status: message.status,
            created_at: message.created_at,
        }
    }
}
