use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-(chat, user) state. Unique per pair; `unread_count` never drops below 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMember {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub unread_count: i64,
    pub is_archived: bool,
    pub is_favorite: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_read_message_id: Option<Uuid>,
}

impl ChatMember {
    pub fn new(chat_id: Uuid, user_id: Uuid) -> Self {
        Self {
            chat_id,
            user_id,
            unread_count: 0,
            is_archived: false,
            is_favorite: false,
            deleted_at: None,
            last_read_message_id: None,
        }
    }
}
