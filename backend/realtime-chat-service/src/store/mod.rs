//! Persistence seam for the realtime core
//!
//! The realtime core only needs a narrow slice of the chat database. This
//! trait abstracts those operations so the service can run against
//! PostgreSQL in production and an in-memory store in tests.

pub mod memory;
pub mod postgres;

use crate::error::AppResult;
use crate::models::{Chat, ChatMember, Contact, Message, NewMessage};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub use memory::InMemoryStore;
pub use postgres::PgChatStore;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Load a chat together with its ordered member list.
    async fn find_chat_by_id(&self, chat_id: Uuid) -> AppResult<Option<Chat>>;

    /// Every chat the user is a member of.
    async fn find_chats_by_member(&self, user_id: Uuid) -> AppResult<Vec<Chat>>;

    async fn update_chat_last_message(&self, chat_id: Uuid, message_id: Uuid) -> AppResult<()>;

    /// Append members (and their per-member rows). Existing members are skipped.
    async fn add_members_to_chat(&self, chat_id: Uuid, member_ids: &[Uuid]) -> AppResult<()>;

    /// Both directed contact rows between two users, in no particular order.
    async fn find_contacts_between(&self, user_a: Uuid, user_b: Uuid) -> AppResult<Vec<Contact>>;

    async fn create_message(&self, new_message: NewMessage) -> AppResult<Message>;

    /// Upgrade every message in the chat not sent by `excluding_sender` to
    /// `seen`. Returns the number of rows changed.
    async fn bulk_mark_messages_seen(&self, chat_id: Uuid, excluding_sender: Uuid)
        -> AppResult<u64>;

    /// Atomic `unread_count += 1` for every member of the chat not listed in
    /// `excluded_user_ids`.
    async fn increment_unread_excluding(
        &self,
        chat_id: Uuid,
        excluded_user_ids: &[Uuid],
    ) -> AppResult<()>;

    async fn reset_unread(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<()>;

    async fn find_chat_member(&self, chat_id: Uuid, user_id: Uuid)
        -> AppResult<Option<ChatMember>>;

    /// Persist a message, bump unread counters and move the chat's
    /// last-message pointer.
    ///
    /// The default runs the three steps sequentially (at-least-once: a failure
    /// part way leaves earlier steps applied). Stores with transactions
    /// override this to make the three steps atomic.
    async fn record_message(
        &self,
        new_message: NewMessage,
        excluded_from_unread: &[Uuid],
    ) -> AppResult<Message> {
        let message = self.create_message(new_message).await?;
        self.increment_unread_excluding(message.chat_id, excluded_from_unread)
            .await?;
        self.update_chat_last_message(message.chat_id, message.id)
            .await?;
        Ok(message)
    }
}

pub type DynChatStore = Arc<dyn ChatStore>;
