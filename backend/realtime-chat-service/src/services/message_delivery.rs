//! Message delivery engine
//!
//! Send pipeline:
//! 1. validate and check the permission oracle (reject with `message:error`)
//! 2. snapshot room occupancy and the online set
//! 3. compute the initial status
//! 4. persist, bump unread for members not viewing the room, move the
//!    last-message pointer (one `ChatStore::record_message` call)
//! 5. fan out `receive_message_global` to every member's personal channel
//!    and `receive_message` to the room, both from the same payload

use crate::error::AppResult;
use crate::metrics;
use crate::models::{Chat, Message, MessagePayload, MessageStatus, NewMessage};
use crate::services::permission::PermissionOracle;
use crate::services::presence::PresenceRegistry;
use crate::store::DynChatStore;
use crate::websocket::events::{DeleteMessage, SendMessage, ServerEvent};
use crate::websocket::{Channel, ConnectionRegistry, SessionId};
use std::collections::HashSet;
use uuid::Uuid;

pub const MESSAGING_DISABLED: &str = "Messaging is disabled for this chat";
pub const EMPTY_MESSAGE: &str = "Message must contain text or an image";
pub const CHAT_NOT_FOUND: &str = "Chat not found";
pub const SENDER_MISMATCH: &str = "Sender does not match this connection";

#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent(Message),
    /// Rejected before anything was persisted; the reason went to the sender
    Rejected(&'static str),
}

/// Status one recipient would see right now
pub fn recipient_status(
    recipient_id: Uuid,
    room_occupants: &HashSet<Uuid>,
    online_users: &HashSet<Uuid>,
) -> MessageStatus {
    if room_occupants.contains(&recipient_id) {
        MessageStatus::Seen
    } else if online_users.contains(&recipient_id) {
        MessageStatus::Delivered
    } else {
        MessageStatus::Sent
    }
}

/// Stored status for a new message: the least advanced recipient status.
///
/// A direct chat has one recipient, so this is exactly that recipient's
/// status. A chat without recipients stores `sent`.
pub fn initial_status(
    chat: &Chat,
    sender_id: Uuid,
    room_occupants: &HashSet<Uuid>,
    online_users: &HashSet<Uuid>,
) -> MessageStatus {
    chat.recipients(sender_id)
        .into_iter()
        .map(|r| recipient_status(r, room_occupants, online_users))
        .min()
        .unwrap_or(MessageStatus::Sent)
}

#[derive(Clone)]
pub struct MessageDeliveryEngine {
    store: DynChatStore,
    registry: ConnectionRegistry,
    presence: PresenceRegistry,
    permission: PermissionOracle,
}

impl MessageDeliveryEngine {
    pub fn new(
        store: DynChatStore,
        registry: ConnectionRegistry,
        presence: PresenceRegistry,
        permission: PermissionOracle,
    ) -> Self {
        Self {
            store,
            registry,
            presence,
            permission,
        }
    }

    pub async fn send_message(
        &self,
        session_id: SessionId,
        session_user: Option<Uuid>,
        request: SendMessage,
    ) -> AppResult<SendOutcome> {
        if request.is_empty() {
            return self.reject(session_id, EMPTY_MESSAGE).await;
        }
        if session_user != Some(request.sender_id) {
            tracing::warn!(
                session_id = %session_id,
                claimed_sender = %request.sender_id,
                "send_message sender does not match session user"
            );
            return self.reject(session_id, SENDER_MISMATCH).await;
        }

        let Some(chat) = self.store.find_chat_by_id(request.chat_id).await? else {
            return self.reject(session_id, CHAT_NOT_FOUND).await;
        };
        if !self.permission.can_send_in(&chat, request.sender_id).await? {
            return self.reject(session_id, MESSAGING_DISABLED).await;
        }

        let occupants = self.registry.room_occupants(chat.id).await;
        let online = self.presence.online_users().await;
        let status = initial_status(&chat, request.sender_id, &occupants, &online);

        let mut excluded: Vec<Uuid> = occupants.into_iter().collect();
        if !excluded.contains(&request.sender_id) {
            excluded.push(request.sender_id);
        }

        let new_message = NewMessage::new(
            chat.id,
            request.sender_id,
            request.text,
            request.image_url,
            status,
        );
        let size = new_message.approximate_size();
        let message = self.store.record_message(new_message, &excluded).await?;
        metrics::record_message(size);

        tracing::debug!(
            message_id = %message.id,
            chat_id = %chat.id,
            status = %message.status,
            "message stored"
        );

        let payload = MessagePayload::from(&message);
        let global = ServerEvent::ReceiveMessageGlobal(payload.clone()).to_frame()?;
        for member in &chat.members {
            self.registry
                .broadcast(Channel::User(*member), global.clone())
                .await;
        }
        let in_room = ServerEvent::ReceiveMessage(payload).to_frame()?;
        self.registry.broadcast(Channel::Room(chat.id), in_room).await;

        Ok(SendOutcome::Sent(message))
    }

    /// Tell everyone viewing the chat a message was removed. Persistence is
    /// the REST layer's job.
    pub async fn relay_deletion(&self, request: DeleteMessage) -> AppResult<()> {
        let frame = ServerEvent::MessageDeleted {
            message_id: request.message_id,
        }
        .to_frame()?;
        self.registry
            .broadcast(Channel::Room(request.chat_id), frame)
            .await;
        Ok(())
    }

    async fn reject(&self, session_id: SessionId, reason: &'static str) -> AppResult<SendOutcome> {
        let frame = ServerEvent::MessageError {
            message: reason.to_string(),
        }
        .to_frame()?;
        self.registry.send_to_session(session_id, frame).await;
        Ok(SendOutcome::Rejected(reason))
    }
}
