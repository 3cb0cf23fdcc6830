//! WebSocket wire events
//!
//! Every frame in both directions has the same envelope:
//!
//! ```json
//! { "event": "receive_message", "data": { ... } }
//! ```
//!
//! Inbound frames decode straight into [`ClientEvent`]. Outbound events are
//! listed in [`ServerEvent`]; their serialization lives in one place
//! (`to_payload_value`) so every emitter produces identical shapes.

use super::ServerFrame;
use crate::error::AppResult;
use crate::metrics::HealthSnapshot;
use crate::models::MessagePayload;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Inbound
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl SendMessage {
    /// Neither non-blank text nor an image
    pub fn is_empty(&self) -> bool {
        let has_text = self
            .text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        let has_image = self
            .image_url
            .as_deref()
            .map(|u| !u.is_empty())
            .unwrap_or(false);
        !has_text && !has_image
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub room: Uuid,
    /// Display name shown next to the draft
    #[serde(default)]
    pub sender: String,
    pub sender_id: Uuid,
    #[serde(default)]
    pub draft: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsSeen {
    pub chat_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessage {
    pub chat_id: Uuid,
    pub message_id: Uuid,
}

/// Events a client may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join_room")]
    JoinRoom(Uuid),

    #[serde(rename = "leave_room")]
    LeaveRoom(Uuid),

    #[serde(rename = "send_message")]
    SendMessage(SendMessage),

    #[serde(rename = "typing_update")]
    TypingUpdate(TypingUpdate),

    #[serde(rename = "mark_as_seen")]
    MarkAsSeen(MarkAsSeen),

    #[serde(rename = "delete_message")]
    DeleteMessage(DeleteMessage),

    #[serde(rename = "system:health_check")]
    HealthCheck,

    /// Client clock in milliseconds since the epoch
    #[serde(rename = "system:ping")]
    Ping(i64),
}

impl ClientEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::TypingUpdate(_) => "typing_update",
            ClientEvent::MarkAsSeen(_) => "mark_as_seen",
            ClientEvent::DeleteMessage(_) => "delete_message",
            ClientEvent::HealthCheck => "system:health_check",
            ClientEvent::Ping(_) => "system:ping",
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Last non-empty draft a user left in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub sender: String,
    pub sender_id: Uuid,
    pub draft: String,
    pub profile_picture: Option<String>,
}

impl From<&TypingUpdate> for Draft {
    fn from(update: &TypingUpdate) -> Self {
        Self {
            sender: update.sender.clone(),
            sender_id: update.sender_id,
            draft: update.draft.clone(),
            profile_picture: update.profile_picture.clone(),
        }
    }
}

/// Notifications pushed by the REST layer after its own persistence work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "chat_created")]
    ChatCreated,
    #[serde(rename = "members_added")]
    MembersAdded,
    #[serde(rename = "added_to_group")]
    AddedToGroup,
    #[serde(rename = "member_left")]
    MemberLeft,
    #[serde(rename = "group_updated")]
    GroupUpdated,
    #[serde(rename = "chat_status")]
    ChatStatus,
    #[serde(rename = "contact:request_received")]
    ContactRequestReceived,
    #[serde(rename = "contact:request_accepted")]
    ContactRequestAccepted,
    #[serde(rename = "contact:deleted")]
    ContactDeleted,
}

impl NotificationKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            NotificationKind::ChatCreated => "chat_created",
            NotificationKind::MembersAdded => "members_added",
            NotificationKind::AddedToGroup => "added_to_group",
            NotificationKind::MemberLeft => "member_left",
            NotificationKind::GroupUpdated => "group_updated",
            NotificationKind::ChatStatus => "chat_status",
            NotificationKind::ContactRequestReceived => "contact:request_received",
            NotificationKind::ContactRequestAccepted => "contact:request_accepted",
            NotificationKind::ContactDeleted => "contact:deleted",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

/// Events the server emits
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ChatStatus {
        chat_id: Uuid,
        is_messaging_disabled: bool,
    },
    /// member ID -> online
    RoomPresence(HashMap<Uuid, bool>),
    /// user ID -> draft
    InitialTypingState(HashMap<Uuid, Draft>),
    RoomJoined(Uuid),
    MessageError {
        message: String,
    },
    ReceiveMessage(MessagePayload),
    ReceiveMessageGlobal(MessagePayload),
    CurrentDraft(Draft),
    UserTypingGlobal {
        chat_id: Uuid,
        is_typing: bool,
    },
    MessagesSeenUpdate {
        chat_id: Uuid,
    },
    MessageDeleted {
        message_id: Uuid,
    },
    UserStatusUpdate {
        user_id: Uuid,
        is_online: bool,
    },
    Health(HealthSnapshot),
    Pong {
        server_time: i64,
        latency: i64,
    },
    Notification {
        kind: NotificationKind,
        payload: Value,
    },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::ChatStatus { .. } => "chat_status",
            ServerEvent::RoomPresence(_) => "room_presence",
            ServerEvent::InitialTypingState(_) => "initial_typing_state",
            ServerEvent::RoomJoined(_) => "room_joined",
            ServerEvent::MessageError { .. } => "message:error",
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::ReceiveMessageGlobal(_) => "receive_message_global",
            ServerEvent::CurrentDraft(_) => "current_draft",
            ServerEvent::UserTypingGlobal { .. } => "user_typing_global",
            ServerEvent::MessagesSeenUpdate { .. } => "messages_seen_update",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
            ServerEvent::UserStatusUpdate { .. } => "user_status_update",
            ServerEvent::Health(_) => "system:health",
            ServerEvent::Pong { .. } => "system:pong",
            ServerEvent::Notification { kind, .. } => kind.event_type(),
        }
    }

    /// The `data` half of the envelope
    pub fn to_payload_value(&self) -> Result<Value, serde_json::Error> {
        let value = match self {
            ServerEvent::ChatStatus {
                chat_id,
                is_messaging_disabled,
            } => json!({ "chatId": chat_id, "isMessagingDisabled": is_messaging_disabled }),
            ServerEvent::RoomPresence(snapshot) => serde_json::to_value(snapshot)?,
            ServerEvent::InitialTypingState(drafts) => serde_json::to_value(drafts)?,
            ServerEvent::RoomJoined(room_id) => json!(room_id),
            ServerEvent::MessageError { message } => json!({ "message": message }),
            ServerEvent::ReceiveMessage(payload) | ServerEvent::ReceiveMessageGlobal(payload) => {
                serde_json::to_value(payload)?
            }
            ServerEvent::CurrentDraft(draft) => serde_json::to_value(draft)?,
            ServerEvent::UserTypingGlobal { chat_id, is_typing } => {
                json!({ "chatId": chat_id, "isTyping": is_typing })
            }
            ServerEvent::MessagesSeenUpdate { chat_id } => json!({ "chatId": chat_id }),
            ServerEvent::MessageDeleted { message_id } => json!({ "messageId": message_id }),
            ServerEvent::UserStatusUpdate { user_id, is_online } => {
                json!({ "userId": user_id, "isOnline": is_online })
            }
            ServerEvent::Health(snapshot) => serde_json::to_value(snapshot)?,
            ServerEvent::Pong {
                server_time,
                latency,
            } => json!({ "serverTime": server_time, "latency": latency }),
            ServerEvent::Notification { payload, .. } => payload.clone(),
        };
        Ok(value)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let envelope = json!({
            "event": self.event_type(),
            "data": self.to_payload_value()?,
        });
        serde_json::to_string(&envelope)
    }

    pub fn to_frame(&self) -> AppResult<ServerFrame> {
        Ok(ServerFrame::Text(self.to_json()?))
    }
}
