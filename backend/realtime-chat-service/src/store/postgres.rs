use super::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::{Chat, ChatMember, Contact, ContactStatus, Message, MessageStatus, NewMessage};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

const SELECT_CHAT: &str = "
    SELECT c.id, c.is_group, c.name, c.last_message_id, c.created_at, c.updated_at,
           COALESCE(
               array_agg(m.user_id ORDER BY m.position) FILTER (WHERE m.user_id IS NOT NULL),
               '{}'
           ) AS members
    FROM chats c
    LEFT JOIN chat_members m ON m.chat_id = c.id";

const INSERT_MESSAGE: &str = "
    INSERT INTO messages (id, chat_id, sender_id, text, image_url, status)
    VALUES ($1, $2, $3, $4, $5, $6)
    RETURNING created_at";

const INCREMENT_UNREAD: &str = "
    UPDATE chat_members
    SET unread_count = unread_count + 1, updated_at = NOW()
    WHERE chat_id = $1 AND NOT (user_id = ANY($2))";

const UPDATE_LAST_MESSAGE: &str = "
    UPDATE chats SET last_message_id = $2, updated_at = NOW() WHERE id = $1";

/// PostgreSQL-backed `ChatStore` (tokio-postgres over a deadpool pool)
#[derive(Clone)]
pub struct PgChatStore {
    pool: Pool,
}

impl PgChatStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn chat_from_row(row: &Row) -> Chat {
        Chat {
            id: row.get("id"),
            is_group: row.get("is_group"),
            members: row.get("members"),
            name: row.get("name"),
            last_message_id: row.get("last_message_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn contact_from_row(row: &Row) -> AppResult<Contact> {
        let status: String = row.get("status");
        let status = ContactStatus::from_db(&status)
            .ok_or_else(|| AppError::Database(format!("unknown contact status '{status}'")))?;
        Ok(Contact::new(row.get("user_id"), row.get("contact_id"), status))
    }

    fn message_from_insert(new_message: NewMessage, row: &Row) -> Message {
        Message {
            id: new_message.id,
            chat_id: new_message.chat_id,
            sender_id: new_message.sender_id,
            text: new_message.text,
            image_url: new_message.image_url,
            status: new_message.status,
            created_at: row.get("created_at"),
            deleted_at: None,
        }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn find_chat_by_id(&self, chat_id: Uuid) -> AppResult<Option<Chat>> {
        let client = self.pool.get().await?;
        let sql = format!("{SELECT_CHAT} WHERE c.id = $1 GROUP BY c.id");
        let row = client.query_opt(sql.as_str(), &[&chat_id]).await?;
        Ok(row.as_ref().map(Self::chat_from_row))
    }

    async fn find_chats_by_member(&self, user_id: Uuid) -> AppResult<Vec<Chat>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "{SELECT_CHAT} WHERE c.id IN (SELECT chat_id FROM chat_members WHERE user_id = $1) \
             GROUP BY c.id"
        );
        let rows = client.query(sql.as_str(), &[&user_id]).await?;
        Ok(rows.iter().map(Self::chat_from_row).collect())
    }

    async fn update_chat_last_message(&self, chat_id: Uuid, message_id: Uuid) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(UPDATE_LAST_MESSAGE, &[&chat_id, &message_id])
            .await?;
        Ok(())
    }

    async fn add_members_to_chat(&self, chat_id: Uuid, member_ids: &[Uuid]) -> AppResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let exists = tx
            .query_opt("SELECT 1 FROM chats WHERE id = $1 FOR UPDATE", &[&chat_id])
            .await?;
        if exists.is_none() {
            return Err(AppError::NotFound(format!("chat {chat_id}")));
        }

        for member_id in member_ids {
            tx.execute(
                "INSERT INTO chat_members (chat_id, user_id, position)
                 VALUES ($1, $2, (SELECT COALESCE(MAX(position) + 1, 0)
                                  FROM chat_members WHERE chat_id = $1))
                 ON CONFLICT (chat_id, user_id) DO NOTHING",
                &[&chat_id, member_id],
            )
            .await?;
        }
        tx.execute(
            "UPDATE chats SET updated_at = NOW() WHERE id = $1",
            &[&chat_id],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_contacts_between(&self, user_a: Uuid, user_b: Uuid) -> AppResult<Vec<Contact>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT user_id, contact_id, status FROM contacts
                 WHERE (user_id = $1 AND contact_id = $2)
                    OR (user_id = $2 AND contact_id = $1)",
                &[&user_a, &user_b],
            )
            .await?;
        rows.iter().map(Self::contact_from_row).collect()
    }

    async fn create_message(&self, new_message: NewMessage) -> AppResult<Message> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                INSERT_MESSAGE,
                &[
                    &new_message.id,
                    &new_message.chat_id,
                    &new_message.sender_id,
                    &new_message.text,
                    &new_message.image_url,
                    &new_message.status.to_db(),
                ],
            )
            .await?;
        Ok(Self::message_from_insert(new_message, &row))
    }

    async fn bulk_mark_messages_seen(
        &self,
        chat_id: Uuid,
        excluding_sender: Uuid,
    ) -> AppResult<u64> {
        let client = self.pool.get().await?;
        let changed = client
            .execute(
                "UPDATE messages SET status = $3
                 WHERE chat_id = $1 AND sender_id <> $2 AND status <> $3",
                &[&chat_id, &excluding_sender, &MessageStatus::Seen.to_db()],
            )
            .await?;
        Ok(changed)
    }

    async fn increment_unread_excluding(
        &self,
        chat_id: Uuid,
        excluded_user_ids: &[Uuid],
    ) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(INCREMENT_UNREAD, &[&chat_id, &excluded_user_ids])
            .await?;
        Ok(())
    }

    async fn reset_unread(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE chat_members SET unread_count = 0, updated_at = NOW()
                 WHERE chat_id = $1 AND user_id = $2",
                &[&chat_id, &user_id],
            )
            .await?;
        Ok(())
    }

    async fn find_chat_member(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<ChatMember>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT chat_id, user_id, unread_count, is_archived, is_favorite,
                        deleted_at, last_read_message_id
                 FROM chat_members WHERE chat_id = $1 AND user_id = $2",
                &[&chat_id, &user_id],
            )
            .await?;
        Ok(row.map(|row| ChatMember {
            chat_id: row.get("chat_id"),
            user_id: row.get("user_id"),
            unread_count: row.get("unread_count"),
            is_archived: row.get("is_archived"),
            is_favorite: row.get("is_favorite"),
            deleted_at: row.get("deleted_at"),
            last_read_message_id: row.get("last_read_message_id"),
        }))
    }

    /// Insert, unread bump and last-message pointer commit together or not at all.
    async fn record_message(
        &self,
        new_message: NewMessage,
        excluded_from_unread: &[Uuid],
    ) -> AppResult<Message> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                INSERT_MESSAGE,
                &[
                    &new_message.id,
                    &new_message.chat_id,
                    &new_message.sender_id,
                    &new_message.text,
                    &new_message.image_url,
                    &new_message.status.to_db(),
                ],
            )
            .await?;
        tx.execute(
            INCREMENT_UNREAD,
            &[&new_message.chat_id, &excluded_from_unread],
        )
        .await?;
        tx.execute(
            UPDATE_LAST_MESSAGE,
            &[&new_message.chat_id, &new_message.id],
        )
        .await?;

        tx.commit().await?;
        Ok(Self::message_from_insert(new_message, &row))
    }
}
