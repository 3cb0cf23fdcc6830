use super::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::{Chat, ChatMember, Contact, ContactStatus, Message, MessageStatus, NewMessage};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    chats: HashMap<Uuid, Chat>,
    members: HashMap<(Uuid, Uuid), ChatMember>,
    contacts: HashMap<(Uuid, Uuid), Contact>,
    /// Insertion order doubles as the tie-breaker for equal timestamps
    messages: Vec<Message>,
}

/// Process-local `ChatStore`.
///
/// Backs the integration tests and `STORE_BACKEND=memory` deployments. All
/// state sits behind one lock, so `record_message` is atomic here too.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a database outage: every operation fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Database("store unavailable".into()));
        }
        Ok(())
    }

    pub async fn create_direct_chat(&self, user_a: Uuid, user_b: Uuid) -> Chat {
        self.insert_chat(false, None, vec![user_a, user_b]).await
    }

    pub async fn create_group_chat(&self, name: &str, members: &[Uuid]) -> Chat {
        self.insert_chat(true, Some(name.to_string()), members.to_vec())
            .await
    }

    async fn insert_chat(&self, is_group: bool, name: Option<String>, members: Vec<Uuid>) -> Chat {
        let now = Utc::now();
        let mut distinct = Vec::with_capacity(members.len());
        for member in members {
            if !distinct.contains(&member) {
                distinct.push(member);
            }
        }

        let chat = Chat {
            id: Uuid::new_v4(),
            is_group,
            members: distinct,
            name,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().await;
        for member in &chat.members {
            state
                .members
                .insert((chat.id, *member), ChatMember::new(chat.id, *member));
        }
        state.chats.insert(chat.id, chat.clone());
        chat
    }

    /// Upsert the directed row `user_id -> contact_id`.
    pub async fn set_contact(&self, user_id: Uuid, contact_id: Uuid, status: ContactStatus) {
        let mut state = self.state.write().await;
        state.contacts.insert(
            (user_id, contact_id),
            Contact::new(user_id, contact_id, status),
        );
    }

    /// Both directions accepted.
    pub async fn make_mutual_contacts(&self, user_a: Uuid, user_b: Uuid) {
        self.set_contact(user_a, user_b, ContactStatus::Accepted)
            .await;
        self.set_contact(user_b, user_a, ContactStatus::Accepted)
            .await;
    }

    pub async fn messages_in_chat(&self, chat_id: Uuid) -> Vec<Message> {
        let state = self.state.read().await;
        state
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect()
    }

    fn apply_increment(state: &mut MemoryState, chat_id: Uuid, excluded: &[Uuid]) {
        for ((member_chat, member_user), member) in state.members.iter_mut() {
            if *member_chat == chat_id && !excluded.contains(member_user) {
                member.unread_count += 1;
            }
        }
    }

    fn apply_last_message(state: &mut MemoryState, chat_id: Uuid, message_id: Uuid) {
        if let Some(chat) = state.chats.get_mut(&chat_id) {
            chat.last_message_id = Some(message_id);
            chat.updated_at = Utc::now();
        }
    }

    fn build_message(new_message: NewMessage) -> Message {
        Message {
            id: new_message.id,
            chat_id: new_message.chat_id,
            sender_id: new_message.sender_id,
            text: new_message.text,
            image_url: new_message.image_url,
            status: new_message.status,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn find_chat_by_id(&self, chat_id: Uuid) -> AppResult<Option<Chat>> {
        self.check_available()?;
        Ok(self.state.read().await.chats.get(&chat_id).cloned())
    }

    async fn find_chats_by_member(&self, user_id: Uuid) -> AppResult<Vec<Chat>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .chats
            .values()
            .filter(|c| c.has_member(user_id))
            .cloned()
            .collect())
    }

    async fn update_chat_last_message(&self, chat_id: Uuid, message_id: Uuid) -> AppResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        Self::apply_last_message(&mut state, chat_id, message_id);
        Ok(())
    }

    async fn add_members_to_chat(&self, chat_id: Uuid, member_ids: &[Uuid]) -> AppResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let chat = state
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| AppError::NotFound(format!("chat {chat_id}")))?;

        let mut added = Vec::new();
        for member in member_ids {
            if !chat.members.contains(member) {
                chat.members.push(*member);
                added.push(*member);
            }
        }
        chat.updated_at = Utc::now();

        for member in added {
            state
                .members
                .insert((chat_id, member), ChatMember::new(chat_id, member));
        }
        Ok(())
    }

    async fn find_contacts_between(&self, user_a: Uuid, user_b: Uuid) -> AppResult<Vec<Contact>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok([(user_a, user_b), (user_b, user_a)]
            .iter()
            .filter_map(|key| state.contacts.get(key).cloned())
            .collect())
    }

    async fn create_message(&self, new_message: NewMessage) -> AppResult<Message> {
        self.check_available()?;
        let message = Self::build_message(new_message);
        self.state.write().await.messages.push(message.clone());
        Ok(message)
    }

    async fn bulk_mark_messages_seen(
        &self,
        chat_id: Uuid,
        excluding_sender: Uuid,
    ) -> AppResult<u64> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let mut changed = 0;
        for message in state.messages.iter_mut() {
            if message.chat_id == chat_id
                && message.sender_id != excluding_sender
                && message.status != MessageStatus::Seen
            {
                message.status = message.status.upgrade(MessageStatus::Seen);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn increment_unread_excluding(
        &self,
        chat_id: Uuid,
        excluded_user_ids: &[Uuid],
    ) -> AppResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        Self::apply_increment(&mut state, chat_id, excluded_user_ids);
        Ok(())
    }

    async fn reset_unread(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if let Some(member) = state.members.get_mut(&(chat_id, user_id)) {
            member.unread_count = 0;
        }
        Ok(())
    }

    async fn find_chat_member(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<ChatMember>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&(chat_id, user_id))
            .cloned())
    }

    async fn record_message(
        &self,
        new_message: NewMessage,
        excluded_from_unread: &[Uuid],
    ) -> AppResult<Message> {
        self.check_available()?;
        let message = Self::build_message(new_message);
        let mut state = self.state.write().await;
        state.messages.push(message.clone());
        Self::apply_increment(&mut state, message.chat_id, excluded_from_unread);
        Self::apply_last_message(&mut state, message.chat_id, message.id);
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_contacts_between_returns_both_directions() {
        let store = InMemoryStore::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.make_mutual_contacts(a, b).await;
        store.set_contact(a, c, ContactStatus::Pending).await;

        assert_eq!(store.find_contacts_between(a, b).await.unwrap().len(), 2);
        assert_eq!(store.find_contacts_between(c, a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_message_updates_counters_and_pointer() {
        let store = InMemoryStore::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chat = store.create_group_chat("team", &[a, b, c]).await;

        let message = store
            .record_message(
                NewMessage::new(chat.id, a, Some("hi".into()), None, MessageStatus::Sent),
                &[a, c],
            )
            .await
            .unwrap();

        let unread = |user| {
            let store = &store;
            let chat_id = chat.id;
            async move {
                store
                    .find_chat_member(chat_id, user)
                    .await
                    .unwrap()
                    .unwrap()
                    .unread_count
            }
        };
        assert_eq!(unread(a).await, 0);
        assert_eq!(unread(b).await, 1);
        assert_eq!(unread(c).await, 0);

        let reloaded = store.find_chat_by_id(chat.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_message_id, Some(message.id));
    }

    #[tokio::test]
    async fn test_add_members_skips_existing() {
        let store = InMemoryStore::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chat = store.create_group_chat("team", &[a, b]).await;

        store.add_members_to_chat(chat.id, &[b, c]).await.unwrap();

        let reloaded = store.find_chat_by_id(chat.id).await.unwrap().unwrap();
        assert_eq!(reloaded.members, vec![a, b, c]);
        assert!(store.find_chat_member(chat.id, c).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.find_chat_by_id(Uuid::new_v4()).await,
            Err(AppError::Database(_))
        ));
        store.set_unavailable(false);
        assert!(store.find_chat_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }
}
