use crate::error::AppResult;
use crate::models::{Chat, Contact, ContactStatus};
use crate::store::DynChatStore;
use uuid::Uuid;

/// Decides whether a user may post into a chat.
///
/// Evaluated against the store on every call; contacts can change between
/// two sends, so nothing is cached.
#[derive(Clone)]
pub struct PermissionOracle {
    store: DynChatStore,
}

impl PermissionOracle {
    pub fn new(store: DynChatStore) -> Self {
        Self { store }
    }

    /// - chat missing: denied
    /// - group chat: allowed
    /// - direct chat: both directed contact rows must exist and be accepted
    pub async fn can_send(&self, sender_id: Uuid, chat_id: Uuid) -> AppResult<bool> {
        match self.store.find_chat_by_id(chat_id).await? {
            Some(chat) => self.can_send_in(&chat, sender_id).await,
            None => Ok(false),
        }
    }

    /// Same decision for a chat the caller already loaded
    pub async fn can_send_in(&self, chat: &Chat, sender_id: Uuid) -> AppResult<bool> {
        if chat.is_group {
            return Ok(true);
        }
        let Some(other_id) = chat.other_member(sender_id) else {
            return Ok(false);
        };

        let contacts = self.store.find_contacts_between(sender_id, other_id).await?;
        Ok(contacts_allow(&contacts))
    }
}

/// Exactly two directed rows, both accepted
pub fn contacts_allow(contacts: &[Contact]) -> bool {
    contacts.len() == 2 && contacts.iter().all(|c| c.status == ContactStatus::Accepted)
}
