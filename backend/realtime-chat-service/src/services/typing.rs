//! Typing and draft broadcasting
//!
//! Two channels carry typing state. The raw draft goes only to sessions that
//! are looking at the room (`current_draft`). The boolean typing indicator
//! goes to every other member's personal channel (`user_typing_global`) so
//! chat lists can show it too, and only fires on start/stop transitions.

use crate::error::AppResult;
use crate::store::DynChatStore;
use crate::websocket::events::{Draft, ServerEvent, TypingUpdate};
use crate::websocket::{Channel, ConnectionRegistry, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// (room, user)
type DraftKey = (Uuid, Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingTransition {
    Started,
    Stopped,
    Unchanged,
}

#[derive(Default)]
struct DraftTable {
    /// room -> user -> last non-empty draft
    drafts: HashMap<Uuid, HashMap<Uuid, Draft>>,
    typing: HashSet<DraftKey>,
    /// Keys each session has written, for disconnect cleanup
    contributions: HashMap<SessionId, HashSet<DraftKey>>,
}

impl DraftTable {
    fn apply(&mut self, session_id: SessionId, update: &TypingUpdate) -> TypingTransition {
        let key = (update.room, update.sender_id);

        if !update.draft.is_empty() {
            self.drafts
                .entry(update.room)
                .or_default()
                .insert(update.sender_id, Draft::from(update));
            self.contributions.entry(session_id).or_default().insert(key);

            if self.typing.insert(key) {
                TypingTransition::Started
            } else {
                TypingTransition::Unchanged
            }
        } else {
            self.remove_draft(key);
            if let Some(keys) = self.contributions.get_mut(&session_id) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.contributions.remove(&session_id);
                }
            }

            if self.typing.remove(&key) {
                TypingTransition::Stopped
            } else {
                TypingTransition::Unchanged
            }
        }
    }

    fn remove_draft(&mut self, (room, user): DraftKey) -> Option<Draft> {
        let room_drafts = self.drafts.get_mut(&room)?;
        let removed = room_drafts.remove(&user);
        if room_drafts.is_empty() {
            self.drafts.remove(&room);
        }
        removed
    }

    /// Drop every key the session contributed that no other session still
    /// holds. Returns (room, emptied draft) for keys whose typing flag was set.
    fn forget(&mut self, session_id: SessionId) -> Vec<(Uuid, Draft)> {
        let Some(keys) = self.contributions.remove(&session_id) else {
            return Vec::new();
        };

        let mut stopped = Vec::new();
        for key in keys {
            if self.contributions.values().any(|k| k.contains(&key)) {
                continue;
            }
            let previous = self.remove_draft(key);
            if self.typing.remove(&key) {
                let (room, user) = key;
                let cleared = match previous {
                    Some(draft) => Draft {
                        draft: String::new(),
                        ..draft
                    },
                    None => Draft {
                        sender: String::new(),
                        sender_id: user,
                        draft: String::new(),
                        profile_picture: None,
                    },
                };
                stopped.push((room, cleared));
            }
        }
        stopped
    }
}

#[derive(Clone)]
pub struct TypingBroadcaster {
    table: Arc<Mutex<DraftTable>>,
    registry: ConnectionRegistry,
    store: DynChatStore,
}

impl TypingBroadcaster {
    pub fn new(registry: ConnectionRegistry, store: DynChatStore) -> Self {
        Self {
            table: Arc::new(Mutex::new(DraftTable::default())),
            registry,
            store,
        }
    }

    pub async fn on_typing_update(
        &self,
        session_id: SessionId,
        update: TypingUpdate,
    ) -> AppResult<TypingTransition> {
        let transition = self.table.lock().await.apply(session_id, &update);

        let relay = ServerEvent::CurrentDraft(Draft::from(&update)).to_frame()?;
        self.registry
            .broadcast_except(Channel::Room(update.room), session_id, relay)
            .await;

        match transition {
            TypingTransition::Started => {
                self.broadcast_global_typing(update.room, update.sender_id, true)
                    .await?
            }
            TypingTransition::Stopped => {
                self.broadcast_global_typing(update.room, update.sender_id, false)
                    .await?
            }
            TypingTransition::Unchanged => {}
        }
        Ok(transition)
    }

    /// Clear what a closing session left behind and tell the room and the
    /// other members that the user stopped typing.
    pub async fn forget_session(&self, session_id: SessionId) -> AppResult<()> {
        let stopped = self.table.lock().await.forget(session_id);

        for (room, cleared) in stopped {
            let sender_id = cleared.sender_id;
            let relay = ServerEvent::CurrentDraft(cleared).to_frame()?;
            self.registry.broadcast(Channel::Room(room), relay).await;
            self.broadcast_global_typing(room, sender_id, false).await?;
        }
        Ok(())
    }

    /// Current drafts for a room, `None` when nobody has one
    pub async fn drafts_for(&self, room_id: Uuid) -> Option<HashMap<Uuid, Draft>> {
        self.table
            .lock()
            .await
            .drafts
            .get(&room_id)
            .filter(|d| !d.is_empty())
            .cloned()
    }

    pub async fn is_typing(&self, room_id: Uuid, user_id: Uuid) -> bool {
        self.table.lock().await.typing.contains(&(room_id, user_id))
    }

    async fn broadcast_global_typing(
        &self,
        chat_id: Uuid,
        sender_id: Uuid,
        is_typing: bool,
    ) -> AppResult<()> {
        let Some(chat) = self.store.find_chat_by_id(chat_id).await? else {
            return Ok(());
        };

        let frame = ServerEvent::UserTypingGlobal { chat_id, is_typing }.to_frame()?;
        for member in chat.recipients(sender_id) {
            self.registry
                .broadcast(Channel::User(member), frame.clone())
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::websocket::ServerFrame;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn update(room: Uuid, sender_id: Uuid, draft: &str) -> TypingUpdate {
        TypingUpdate {
            room,
            sender: "Ada".to_string(),
            sender_id,
            draft: draft.to_string(),
            profile_picture: None,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ServerFrame>) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Text(text) = frame {
                events.push(serde_json::from_str(&text).unwrap());
            }
        }
        events
    }

    fn named<'a>(events: &'a [Value], name: &str) -> Vec<&'a Value> {
        events.iter().filter(|e| e["event"] == name).collect()
    }

    #[test]
    fn test_transitions() {
        let mut table = DraftTable::default();
        let session = SessionId::new();
        let (room, user) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(table.apply(session, &update(room, user, "h")), TypingTransition::Started);
        assert_eq!(table.apply(session, &update(room, user, "he")), TypingTransition::Unchanged);
        assert_eq!(table.apply(session, &update(room, user, "")), TypingTransition::Stopped);
        assert_eq!(table.apply(session, &update(room, user, "")), TypingTransition::Unchanged);
        assert!(table.drafts.is_empty());
        assert!(table.contributions.is_empty());
    }

    #[tokio::test]
    async fn test_typing_start_and_stop_emitted_once() {
        let store = Arc::new(InMemoryStore::new());
        let registry = ConnectionRegistry::new();
        let typing = TypingBroadcaster::new(registry.clone(), store.clone());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let chat = store.create_direct_chat(alice, bob).await;

        let (alice_session, mut alice_rx) = registry.register(Some(alice)).await;
        let (bob_session, mut bob_rx) = registry.register(Some(bob)).await;
        registry.join(alice_session, Channel::Room(chat.id)).await;
        registry.join(bob_session, Channel::User(bob)).await;
        registry.join(bob_session, Channel::Room(chat.id)).await;

        for draft in ["h", "he", "hel", ""] {
            typing
                .on_typing_update(alice_session, update(chat.id, alice, draft))
                .await
                .unwrap();
        }

        let bob_events = drain(&mut bob_rx);
        assert_eq!(named(&bob_events, "current_draft").len(), 4);
        let global = named(&bob_events, "user_typing_global");
        assert_eq!(global.len(), 2);
        assert_eq!(global[0]["data"]["isTyping"], true);
        assert_eq!(global[1]["data"]["isTyping"], false);
        assert_eq!(global[0]["data"]["chatId"], chat.id.to_string());

        // the sender never hears its own draft
        assert!(drain(&mut alice_rx).is_empty());
        assert!(typing.drafts_for(chat.id).await.is_none());
    }

    #[tokio::test]
    async fn test_forget_session_clears_typing() {
        let store = Arc::new(InMemoryStore::new());
        let registry = ConnectionRegistry::new();
        let typing = TypingBroadcaster::new(registry.clone(), store.clone());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let chat = store.create_direct_chat(alice, bob).await;

        let (alice_session, _alice_rx) = registry.register(Some(alice)).await;
        let (bob_session, mut bob_rx) = registry.register(Some(bob)).await;
        registry.join(bob_session, Channel::User(bob)).await;
        registry.join(bob_session, Channel::Room(chat.id)).await;

        typing
            .on_typing_update(alice_session, update(chat.id, alice, "draft"))
            .await
            .unwrap();
        assert!(typing.drafts_for(chat.id).await.is_some());
        drain(&mut bob_rx);

        typing.forget_session(alice_session).await.unwrap();

        assert!(typing.drafts_for(chat.id).await.is_none());
        assert!(!typing.is_typing(chat.id, alice).await);
        let events = drain(&mut bob_rx);
        let relay = named(&events, "current_draft");
        assert_eq!(relay.len(), 1);
        assert_eq!(relay[0]["data"]["draft"], "");
        assert_eq!(relay[0]["data"]["sender"], "Ada");
        let global = named(&events, "user_typing_global");
        assert_eq!(global.len(), 1);
        assert_eq!(global[0]["data"]["isTyping"], false);

        // nothing left to clear
        typing.forget_session(alice_session).await.unwrap();
        assert!(drain(&mut bob_rx).is_empty());
    }
}
