//! Connection lifecycle: connect, room switching, disconnect
//!
//! Store failures here never close the connection. They are logged and the
//! affected piece of information (chat status, presence snapshot, presence
//! broadcast) is simply left out.

use crate::error::AppResult;
use crate::metrics;
use crate::services::permission::PermissionOracle;
use crate::services::presence::{Departure, PresenceRegistry};
use crate::services::read_status::ReadStatusPropagator;
use crate::services::typing::TypingBroadcaster;
use crate::store::DynChatStore;
use crate::websocket::events::ServerEvent;
use crate::websocket::{Channel, ConnectionRegistry, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const REPLACED_REASON: &str = "session replaced by a newer connection";

/// Last presence value broadcast for a user
type AnnouncedSlot = Arc<Mutex<Option<bool>>>;

#[derive(Clone)]
pub struct SessionManager {
    store: DynChatStore,
    registry: ConnectionRegistry,
    presence: PresenceRegistry,
    permission: PermissionOracle,
    typing: TypingBroadcaster,
    read_status: ReadStatusPropagator,
    announced: Arc<Mutex<HashMap<Uuid, AnnouncedSlot>>>,
}

impl SessionManager {
    pub fn new(
        store: DynChatStore,
        registry: ConnectionRegistry,
        presence: PresenceRegistry,
        permission: PermissionOracle,
        typing: TypingBroadcaster,
        read_status: ReadStatusPropagator,
    ) -> Self {
        Self {
            store,
            registry,
            presence,
            permission,
            typing,
            read_status,
            announced: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the sessions that were evicted to make room for this one
    pub async fn on_connect(&self, session_id: SessionId, user_id: Option<Uuid>) -> Vec<SessionId> {
        metrics::record_connection();

        let Some(user_id) = user_id else {
            tracing::info!(session_id = %session_id, "anonymous websocket session connected");
            return Vec::new();
        };

        let evicted = self.presence.register_exclusive(user_id, session_id).await;
        for stale in &evicted {
            tracing::info!(
                user_id = %user_id,
                stale_session = %stale,
                "terminating stale session"
            );
            self.registry.evict(*stale, REPLACED_REASON).await;
        }

        if !self.registry.join(session_id, Channel::User(user_id)).await {
            // Closed (or replaced) before the connect was processed
            tracing::debug!(session_id = %session_id, "session gone before personal channel join");
            if self.presence.unregister(user_id, session_id).await == Departure::WentOffline {
                metrics::set_online_users(self.presence.online_count().await);
                self.announce_presence(user_id).await;
            }
            return evicted;
        }
        metrics::set_online_users(self.presence.online_count().await);

        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            replaced = evicted.len(),
            "websocket session connected"
        );

        self.announce_presence(user_id).await;
        evicted
    }

    pub async fn on_join_room(&self, session_id: SessionId, room_id: Uuid) -> AppResult<()> {
        self.registry.leave_all_except_personal(session_id).await;
        if !self.registry.join(session_id, Channel::Room(room_id)).await {
            return Ok(());
        }
        let user_id = self.registry.session_user(session_id).await;

        match self.store.find_chat_by_id(room_id).await {
            Ok(Some(chat)) => {
                let allowed = match user_id {
                    Some(user_id) => match self.permission.can_send_in(&chat, user_id).await {
                        Ok(allowed) => Some(allowed),
                        Err(e) => {
                            tracing::warn!(room_id = %room_id, error = %e, "permission lookup failed");
                            None
                        }
                    },
                    None => Some(false),
                };
                if let Some(allowed) = allowed {
                    self.emit(
                        session_id,
                        ServerEvent::ChatStatus {
                            chat_id: chat.id,
                            is_messaging_disabled: !allowed,
                        },
                    )
                    .await?;
                }

                let online = self.presence.online_users().await;
                let snapshot: HashMap<Uuid, bool> = chat
                    .members
                    .iter()
                    .map(|m| (*m, online.contains(m)))
                    .collect();
                self.emit(session_id, ServerEvent::RoomPresence(snapshot))
                    .await?;
            }
            Ok(None) => {
                tracing::debug!(room_id = %room_id, "joined room without a chat record");
            }
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "chat lookup failed on join");
            }
        }

        if let Some(drafts) = self.typing.drafts_for(room_id).await {
            self.emit(session_id, ServerEvent::InitialTypingState(drafts))
                .await?;
        }
        self.emit(session_id, ServerEvent::RoomJoined(room_id)).await
    }

    pub async fn on_leave_room(&self, session_id: SessionId, room_id: Uuid) {
        self.registry
            .leave(session_id, Channel::Room(room_id))
            .await;
    }

    pub async fn on_disconnect(&self, session_id: SessionId, user_id: Option<Uuid>) -> Departure {
        metrics::record_disconnection();
        if !self.registry.remove_session(session_id).await {
            tracing::debug!(session_id = %session_id, "session already evicted from routing");
        }

        // Evicted sessions may still own drafts
        if let Err(e) = self.typing.forget_session(session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to clear drafts");
        }

        let Some(user_id) = user_id else {
            tracing::info!(session_id = %session_id, "anonymous websocket session disconnected");
            return Departure::NotTracked;
        };

        let departure = self.presence.unregister(user_id, session_id).await;
        match departure {
            Departure::WentOffline => {
                metrics::set_online_users(self.presence.online_count().await);
                tracing::info!(user_id = %user_id, session_id = %session_id, "user went offline");
                self.announce_presence(user_id).await;
            }
            Departure::StillOnline => {
                tracing::info!(user_id = %user_id, session_id = %session_id, "session closed, user still online");
            }
            Departure::NotTracked => {
                tracing::debug!(user_id = %user_id, session_id = %session_id, "replaced session closed");
            }
        }
        departure
    }

    /// Broadcast the user's current presence if it differs from the last
    /// value sent. Announcements for one user are serialized, so the final
    /// broadcast always matches the registry.
    async fn announce_presence(&self, user_id: Uuid) {
        let slot = self
            .announced
            .lock()
            .await
            .entry(user_id)
            .or_default()
            .clone();

        let mut last = slot.lock().await;
        let is_online = self.presence.is_online(user_id).await;
        if *last != Some(is_online) {
            match self.read_status.broadcast_presence(user_id, is_online).await {
                Ok(_) => *last = Some(is_online),
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        is_online,
                        error = %e,
                        "failed to broadcast presence"
                    );
                }
            }
        }
        drop(last);

        if !is_online {
            let mut announced = self.announced.lock().await;
            // Map entry plus our clone: nobody else is announcing
            if Arc::strong_count(&slot) == 2 {
                announced.remove(&user_id);
            }
        }
    }

    async fn emit(&self, session_id: SessionId, event: ServerEvent) -> AppResult<()> {
        self.registry
            .send_to_session(session_id, event.to_frame()?)
            .await;
        Ok(())
    }
}
