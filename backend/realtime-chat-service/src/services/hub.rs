//! Event dispatch hub
//!
//! `ChatHub` owns the shared realtime state and wires the components
//! together. Every connection gets one worker task that processes its
//! commands strictly in arrival order (connect, client events, disconnect);
//! different connections run concurrently.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::Chat;
use crate::services::message_delivery::MessageDeliveryEngine;
use crate::services::notifier::ChatNotifier;
use crate::services::permission::PermissionOracle;
use crate::services::presence::{Departure, PresenceRegistry};
use crate::services::read_status::ReadStatusPropagator;
use crate::services::session_manager::SessionManager;
use crate::services::typing::TypingBroadcaster;
use crate::store::DynChatStore;
use crate::websocket::events::{ClientEvent, ServerEvent};
use crate::websocket::{ConnectionRegistry, ServerFrame, SessionId};
use chrono::Utc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Work queued by a session actor for its worker
#[derive(Debug)]
pub enum SessionCommand {
    Client(ClientEvent),
    Disconnect,
}

#[derive(Clone)]
pub struct ChatHub {
    store: DynChatStore,
    registry: ConnectionRegistry,
    presence: PresenceRegistry,
    sessions: SessionManager,
    delivery: MessageDeliveryEngine,
    typing: TypingBroadcaster,
    read_status: ReadStatusPropagator,
    notifier: ChatNotifier,
}

impl ChatHub {
    pub fn new(store: DynChatStore) -> Self {
        let registry = ConnectionRegistry::new();
        let presence = PresenceRegistry::new();
        let permission = PermissionOracle::new(store.clone());
        let typing = TypingBroadcaster::new(registry.clone(), store.clone());
        let read_status = ReadStatusPropagator::new(store.clone(), registry.clone());
        let delivery = MessageDeliveryEngine::new(
            store.clone(),
            registry.clone(),
            presence.clone(),
            permission.clone(),
        );
        let sessions = SessionManager::new(
            store.clone(),
            registry.clone(),
            presence.clone(),
            permission,
            typing.clone(),
            read_status.clone(),
        );
        let notifier = ChatNotifier::new(registry.clone());

        Self {
            store,
            registry,
            presence,
            sessions,
            delivery,
            typing,
            read_status,
            notifier,
        }
    }

    pub fn store(&self) -> &DynChatStore {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn notifier(&self) -> &ChatNotifier {
        &self.notifier
    }

    pub fn typing(&self) -> &TypingBroadcaster {
        &self.typing
    }

    /// Register a transport connection without starting its worker.
    /// The caller drives `connect`/`dispatch`/`disconnect` itself.
    pub async fn open_session(
        &self,
        user_id: Option<Uuid>,
    ) -> (SessionId, UnboundedReceiver<ServerFrame>) {
        self.registry.register(user_id).await
    }

    /// Register a connection and start its ordered worker.
    ///
    /// Returns the session ID, the outbound frame stream for the transport
    /// and the command queue the transport feeds. Dropping the command
    /// sender has the same effect as `SessionCommand::Disconnect`.
    pub async fn spawn_session(
        &self,
        user_id: Option<Uuid>,
    ) -> (
        SessionId,
        UnboundedReceiver<ServerFrame>,
        UnboundedSender<SessionCommand>,
    ) {
        let (session_id, frames) = self.open_session(user_id).await;
        let (commands_tx, commands_rx) = unbounded_channel();

        let hub = self.clone();
        tokio::spawn(async move {
            hub.run_session(session_id, user_id, commands_rx).await;
        });

        (session_id, frames, commands_tx)
    }

    async fn run_session(
        self,
        session_id: SessionId,
        user_id: Option<Uuid>,
        mut commands: UnboundedReceiver<SessionCommand>,
    ) {
        self.connect(session_id, user_id).await;
        while let Some(command) = commands.recv().await {
            match command {
                SessionCommand::Client(event) => self.dispatch(session_id, user_id, event).await,
                SessionCommand::Disconnect => break,
            }
        }
        self.disconnect(session_id, user_id).await;
    }

    pub async fn connect(&self, session_id: SessionId, user_id: Option<Uuid>) -> Vec<SessionId> {
        self.sessions.on_connect(session_id, user_id).await
    }

    pub async fn disconnect(&self, session_id: SessionId, user_id: Option<Uuid>) -> Departure {
        self.sessions.on_disconnect(session_id, user_id).await
    }

    /// Handle one client event. Failures are logged; the connection stays up.
    pub async fn dispatch(&self, session_id: SessionId, user_id: Option<Uuid>, event: ClientEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.handle(session_id, user_id, event).await {
            metrics::record_error(event_type);
            tracing::error!(
                session_id = %session_id,
                event = event_type,
                error = %e,
                retryable = e.is_retryable(),
                "failed to handle websocket event"
            );
        }
    }

    async fn handle(
        &self,
        session_id: SessionId,
        user_id: Option<Uuid>,
        event: ClientEvent,
    ) -> AppResult<()> {
        match event {
            ClientEvent::JoinRoom(room_id) => self.sessions.on_join_room(session_id, room_id).await,
            ClientEvent::LeaveRoom(room_id) => {
                self.sessions.on_leave_room(session_id, room_id).await;
                Ok(())
            }
            ClientEvent::SendMessage(request) => {
                self.delivery
                    .send_message(session_id, user_id, request)
                    .await?;
                Ok(())
            }
            ClientEvent::TypingUpdate(update) => {
                if user_id != Some(update.sender_id) {
                    tracing::warn!(session_id = %session_id, "typing_update for another user dropped");
                    return Ok(());
                }
                self.typing.on_typing_update(session_id, update).await?;
                Ok(())
            }
            ClientEvent::MarkAsSeen(request) => {
                if user_id != Some(request.user_id) {
                    tracing::warn!(session_id = %session_id, "mark_as_seen for another user dropped");
                    return Ok(());
                }
                self.read_status
                    .mark_as_seen(request.chat_id, request.user_id)
                    .await?;
                Ok(())
            }
            ClientEvent::DeleteMessage(request) => {
                if user_id.is_none() {
                    tracing::warn!(session_id = %session_id, "delete_message from anonymous session dropped");
                    return Ok(());
                }
                self.delivery.relay_deletion(request).await
            }
            ClientEvent::HealthCheck => {
                let snapshot = metrics::health_snapshot(self.presence.online_count().await);
                self.reply(session_id, ServerEvent::Health(snapshot)).await
            }
            ClientEvent::Ping(client_time) => {
                let server_time = Utc::now().timestamp_millis();
                self.reply(
                    session_id,
                    ServerEvent::Pong {
                        server_time,
                        latency: server_time.saturating_sub(client_time),
                    },
                )
                .await
            }
        }
    }

    async fn reply(&self, session_id: SessionId, event: ServerEvent) -> AppResult<()> {
        self.registry
            .send_to_session(session_id, event.to_frame()?)
            .await;
        Ok(())
    }

    /// Add members to a group chat and notify: `members_added` to the room,
    /// `added_to_group` to each member that was not already in the chat.
    pub async fn add_group_members(&self, chat_id: Uuid, member_ids: &[Uuid]) -> AppResult<Chat> {
        let before = self
            .store
            .find_chat_by_id(chat_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("chat {chat_id}")))?;
        if !before.is_group {
            return Err(AppError::BadRequest("members can only be added to group chats".into()));
        }

        let mut added: Vec<Uuid> = Vec::new();
        for id in member_ids {
            if !before.has_member(*id) && !added.contains(id) {
                added.push(*id);
            }
        }

        self.store.add_members_to_chat(chat_id, &added).await?;
        let chat = self
            .store
            .find_chat_by_id(chat_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("chat {chat_id}")))?;

        if !added.is_empty() {
            self.notifier.members_added(&chat, &added).await?;
        }
        Ok(chat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    async fn next_text(rx: &mut UnboundedReceiver<ServerFrame>) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("frame channel closed");
        match frame {
            ServerFrame::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawned_session_processes_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let hub = ChatHub::new(store.clone());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let chat = store.create_direct_chat(alice, bob).await;
        store.make_mutual_contacts(alice, bob).await;

        let (_session, mut frames, commands) = hub.spawn_session(Some(alice)).await;
        commands
            .send(SessionCommand::Client(ClientEvent::JoinRoom(chat.id)))
            .unwrap();
        commands
            .send(SessionCommand::Client(ClientEvent::Ping(0)))
            .unwrap();

        assert_eq!(next_text(&mut frames).await["event"], "chat_status");
        assert_eq!(next_text(&mut frames).await["event"], "room_presence");
        assert_eq!(next_text(&mut frames).await["event"], "room_joined");
        let pong = next_text(&mut frames).await;
        assert_eq!(pong["event"], "system:pong");
        assert!(pong["data"]["latency"].as_i64().unwrap() > 0);

        commands.send(SessionCommand::Disconnect).unwrap();
        // worker exits and drops the registry sender
        assert!(tokio::time::timeout(Duration::from_secs(2), frames.recv())
            .await
            .unwrap()
            .is_none());
        tokio::time::timeout(Duration::from_secs(2), async {
            while hub.presence().is_online(alice).await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("user still online after disconnect");
    }

    #[tokio::test]
    async fn test_extreme_ping_timestamp_keeps_worker_alive() {
        let hub = ChatHub::new(Arc::new(InMemoryStore::new()));
        let user = Uuid::new_v4();

        let (_session, mut frames, commands) = hub.spawn_session(Some(user)).await;
        commands
            .send(SessionCommand::Client(ClientEvent::Ping(i64::MIN)))
            .unwrap();

        let pong = next_text(&mut frames).await;
        assert_eq!(pong["event"], "system:pong");
        assert_eq!(pong["data"]["latency"].as_i64(), Some(i64::MAX));

        commands.send(SessionCommand::Disconnect).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while hub.presence().is_online(user).await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("user still online after disconnect");
    }

    #[tokio::test]
    async fn test_health_check_replies_to_requester() {
        let hub = ChatHub::new(Arc::new(InMemoryStore::new()));
        let user = Uuid::new_v4();
        let (session, mut rx) = hub.open_session(Some(user)).await;
        hub.connect(session, Some(user)).await;

        hub.dispatch(session, Some(user), ClientEvent::HealthCheck).await;

        let value = next_text(&mut rx).await;
        assert_eq!(value["event"], "system:health");
        assert_eq!(value["data"]["status"], "HEALTHY");
        assert!(value["data"]["load"]["active_online_users"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_add_members_rejects_direct_chat() {
        let store = Arc::new(InMemoryStore::new());
        let hub = ChatHub::new(store.clone());
        let chat = store.create_direct_chat(Uuid::new_v4(), Uuid::new_v4()).await;

        let err = hub
            .add_group_members(chat.id, &[Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let missing = hub.add_group_members(Uuid::new_v4(), &[]).await.unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }
}
