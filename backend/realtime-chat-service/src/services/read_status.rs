use crate::error::AppResult;
use crate::store::DynChatStore;
use crate::websocket::events::ServerEvent;
use crate::websocket::{Channel, ConnectionRegistry};
use std::collections::HashSet;
use uuid::Uuid;

/// Read receipts and online/offline propagation
#[derive(Clone)]
pub struct ReadStatusPropagator {
    store: DynChatStore,
    registry: ConnectionRegistry,
}

impl ReadStatusPropagator {
    pub fn new(store: DynChatStore, registry: ConnectionRegistry) -> Self {
        Self { store, registry }
    }

    /// Upgrade everything the other members sent to `seen`, zero the
    /// caller's unread counter and notify the room. Safe to repeat.
    pub async fn mark_as_seen(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<u64> {
        let upgraded = self.store.bulk_mark_messages_seen(chat_id, user_id).await?;
        self.store.reset_unread(chat_id, user_id).await?;

        let frame = ServerEvent::MessagesSeenUpdate { chat_id }.to_frame()?;
        self.registry.broadcast(Channel::Room(chat_id), frame).await;

        tracing::debug!(chat_id = %chat_id, user_id = %user_id, upgraded, "messages marked seen");
        Ok(upgraded)
    }

    /// Send `user_status_update` to the personal channel of everyone who
    /// shares a chat with `user_id`, once per recipient.
    ///
    /// Cost is O(chats x members) per call.
    pub async fn broadcast_presence(&self, user_id: Uuid, is_online: bool) -> AppResult<usize> {
        let chats = self.store.find_chats_by_member(user_id).await?;

        let recipients: HashSet<Uuid> = chats
            .iter()
            .flat_map(|chat| chat.recipients(user_id))
            .collect();

        let frame = ServerEvent::UserStatusUpdate { user_id, is_online }.to_frame()?;
        for recipient in &recipients {
            self.registry
                .broadcast(Channel::User(*recipient), frame.clone())
                .await;
        }

        tracing::debug!(
            user_id = %user_id,
            is_online,
            chats = chats.len(),
            recipients = recipients.len(),
            "presence broadcast"
        );
        Ok(recipients.len())
    }
}
