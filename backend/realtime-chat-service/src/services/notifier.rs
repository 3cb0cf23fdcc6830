//! Emission interface for the REST layer
//!
//! REST handlers call these after their own persistence work has committed.
//! Every emission is addressed to a channel: a user's personal channel or a
//! chat room.

use crate::error::AppResult;
use crate::models::Chat;
use crate::websocket::events::{NotificationKind, ServerEvent};
use crate::websocket::{Channel, ConnectionRegistry};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Clone)]
pub struct ChatNotifier {
    registry: ConnectionRegistry,
}

impl ChatNotifier {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Emit an arbitrary notification to one channel
    pub async fn emit(&self, target: Channel, kind: NotificationKind, payload: Value) -> AppResult<()> {
        let frame = ServerEvent::Notification { kind, payload }.to_frame()?;
        self.registry.broadcast(target, frame).await;
        tracing::debug!(?target, event = %kind, "notification emitted");
        Ok(())
    }

    async fn emit_to_users(
        &self,
        users: impl IntoIterator<Item = Uuid>,
        kind: NotificationKind,
        payload: Value,
    ) -> AppResult<()> {
        let frame = ServerEvent::Notification { kind, payload }.to_frame()?;
        for user in users {
            self.registry
                .broadcast(Channel::User(user), frame.clone())
                .await;
        }
        Ok(())
    }

    /// `chat_created` to every member's personal channel
    pub async fn chat_created(&self, chat: &Chat) -> AppResult<()> {
        self.emit_to_users(
            chat.members.iter().copied(),
            NotificationKind::ChatCreated,
            json!({ "chat": chat }),
        )
        .await
    }

    /// `members_added` to the room, `added_to_group` to each new member
    pub async fn members_added(&self, chat: &Chat, new_member_ids: &[Uuid]) -> AppResult<()> {
        self.emit(
            Channel::Room(chat.id),
            NotificationKind::MembersAdded,
            json!({
                "chatId": chat.id,
                "newMembers": new_member_ids,
                "chat": chat,
            }),
        )
        .await?;

        self.emit_to_users(
            new_member_ids.iter().copied(),
            NotificationKind::AddedToGroup,
            json!({ "chat": chat }),
        )
        .await
    }

    pub async fn member_left(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        new_admin_id: Option<Uuid>,
    ) -> AppResult<()> {
        self.emit(
            Channel::Room(chat_id),
            NotificationKind::MemberLeft,
            json!({ "chatId": chat_id, "userId": user_id, "newAdmin": new_admin_id }),
        )
        .await
    }

    /// `group_updated` to every member's personal channel
    pub async fn group_updated(&self, chat: &Chat) -> AppResult<()> {
        self.emit_to_users(
            chat.members.iter().copied(),
            NotificationKind::GroupUpdated,
            json!(chat),
        )
        .await
    }

    /// Contact changes flip messaging on or off for the direct chat
    pub async fn chat_status(&self, chat_id: Uuid, is_messaging_disabled: bool) -> AppResult<()> {
        let frame = ServerEvent::ChatStatus {
            chat_id,
            is_messaging_disabled,
        }
        .to_frame()?;
        self.registry.broadcast(Channel::Room(chat_id), frame).await;
        Ok(())
    }

    pub async fn contact_request_received(&self, target_user: Uuid, contact: Value) -> AppResult<()> {
        self.emit(
            Channel::User(target_user),
            NotificationKind::ContactRequestReceived,
            contact,
        )
        .await
    }

    pub async fn contact_request_accepted(&self, requester: Uuid, contact: Value) -> AppResult<()> {
        self.emit(
            Channel::User(requester),
            NotificationKind::ContactRequestAccepted,
            contact,
        )
        .await
    }

    pub async fn contact_deleted(&self, user_id: Uuid, contact_id: Uuid) -> AppResult<()> {
        self.emit(
            Channel::User(contact_id),
            NotificationKind::ContactDeleted,
            json!({ "userId": user_id, "contactId": contact_id }),
        )
        .await
    }
}
