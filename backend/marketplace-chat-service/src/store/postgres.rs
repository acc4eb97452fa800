use super::{ChatStore, ReadTarget};
use crate::error::StoreError;
use crate::models::user::UNKNOWN_USER_NAME;
use crate::models::{
    Conversation, ConversationSummary, ListingRef, ListingSnapshot, Message, MessageView,
    NewMessage, UserPair, UserProfile,
};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.receiver_id, m.body, \
     m.listing_id, m.listing_type, m.listing_title, m.listing_image, m.is_read, m.created_at";

/// PostgreSQL-backed gateway over a deadpool connection pool
#[derive(Clone)]
pub struct PgChatStore {
    pool: Pool,
}

impl PgChatStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn message_from_row(row: &Row) -> Message {
        Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            receiver_id: row.get("receiver_id"),
            body: row.get("body"),
            listing: ListingSnapshot {
                listing_id: row.get("listing_id"),
                listing_type: row.get("listing_type"),
                listing_title: row.get("listing_title"),
                listing_image: row.get("listing_image"),
            },
            is_read: row.get("is_read"),
            created_at: row.get("created_at"),
        }
    }

    fn conversation_from_row(row: &Row) -> Conversation {
        let listing_id: Option<i64> = row.get("listing_id");
        let listing_type: Option<String> = row.get("listing_type");
        Conversation {
            id: row.get("id"),
            participants: UserPair::new(row.get("user_low"), row.get("user_high")),
            listing: match (listing_id, listing_type) {
                (Some(id), Some(kind)) => Some(ListingRef::new(id, kind)),
                _ => None,
            },
            created_at: row.get("created_at"),
        }
    }
}

fn listing_params(listing: Option<&ListingRef>) -> (Option<i64>, Option<&str>) {
    match listing {
        Some(l) => (Some(l.listing_id), Some(l.listing_type.as_str())),
        None => (None, None),
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT 1 FROM users WHERE id = $1", &[&user_id])
            .await?;
        Ok(row.is_some())
    }

    async fn user_profiles(&self, user_ids: &[i64]) -> Result<Vec<UserProfile>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, name, avatar FROM users WHERE id = ANY($1)",
                &[&user_ids],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| UserProfile::new(row.get("id"), row.get::<_, String>("name"), row.get("avatar")))
            .collect())
    }

    async fn find_conversation(
        &self,
        pair: UserPair,
        listing: Option<&ListingRef>,
    ) -> Result<Option<i64>, StoreError> {
        let (listing_id, listing_type) = listing_params(listing);
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id
                FROM conversations
                WHERE user_low = $1
                  AND user_high = $2
                  AND listing_id IS NOT DISTINCT FROM $3
                  AND listing_type IS NOT DISTINCT FROM $4
                "#,
                &[&pair.low(), &pair.high(), &listing_id, &listing_type],
            )
            .await?;

        Ok(row.map(|r| r.get(0)))
    }

    async fn insert_conversation(
        &self,
        pair: UserPair,
        listing: Option<&ListingRef>,
    ) -> Result<i64, StoreError> {
        let (listing_id, listing_type) = listing_params(listing);
        let client = self.pool.get().await?;
        // conversations_pair_listing_key (NULLS NOT DISTINCT) rejects duplicates,
        // including a second general conversation for the same pair.
        let row = client
            .query_one(
                r#"
                INSERT INTO conversations (user_low, user_high, listing_id, listing_type)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
                &[&pair.low(), &pair.high(), &listing_id, &listing_type],
            )
            .await?;

        Ok(row.get(0))
    }

    async fn get_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Option<Conversation>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, user_low, user_high, listing_id, listing_type, created_at \
                 FROM conversations WHERE id = $1",
                &[&conversation_id],
            )
            .await?;

        Ok(row.as_ref().map(Self::conversation_from_row))
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO messages (
                    conversation_id,
                    sender_id,
                    receiver_id,
                    body,
                    listing_id,
                    listing_type,
                    listing_title,
                    listing_image
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id, conversation_id, sender_id, receiver_id, body,
                          listing_id, listing_type, listing_title, listing_image,
                          is_read, created_at
                "#,
                &[
                    &message.conversation_id,
                    &message.sender_id,
                    &message.receiver_id,
                    &message.body,
                    &message.listing.listing_id,
                    &message.listing.listing_type,
                    &message.listing.listing_title,
                    &message.listing.listing_image,
                ],
            )
            .await?;

        Ok(Self::message_from_row(&row))
    }

    async fn get_message(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = $1"),
                &[&message_id],
            )
            .await?;

        Ok(row.as_ref().map(Self::message_from_row))
    }

    async fn mark_read(&self, target: ReadTarget) -> Result<u64, StoreError> {
        let mut client = self.pool.get().await?;
        // Dropping the transaction on an early return rolls it back.
        let tx = client.transaction().await?;

        let updated = match target {
            ReadTarget::Message { message_id } => {
                tx.execute(
                    "UPDATE messages SET is_read = TRUE WHERE id = $1 AND is_read = FALSE",
                    &[&message_id],
                )
                .await?
            }
            ReadTarget::Conversation {
                conversation_id,
                reader_id,
            } => {
                tx.execute(
                    "UPDATE messages SET is_read = TRUE \
                     WHERE conversation_id = $1 AND receiver_id = $2 AND is_read = FALSE",
                    &[&conversation_id, &reader_id],
                )
                .await?
            }
        };

        tx.commit().await?;
        Ok(updated)
    }

    async fn senders_to_reader(
        &self,
        conversation_id: i64,
        reader_id: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT DISTINCT sender_id FROM messages \
                 WHERE conversation_id = $1 AND receiver_id = $2 ORDER BY sender_id",
                &[&conversation_id, &reader_id],
            )
            .await?;

        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn conversations_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT
                    c.id,
                    CASE WHEN c.user_low = $1 THEN c.user_high ELSE c.user_low END AS other_user_id,
                    u.name AS other_user_name,
                    u.avatar AS other_user_avatar,
                    c.listing_id,
                    c.listing_type,
                    lm.body AS last_message,
                    lm.created_at AS last_message_time,
                    lm.listing_title,
                    lm.listing_image
                FROM conversations c
                LEFT JOIN LATERAL (
                    SELECT m.body, m.created_at, m.listing_title, m.listing_image
                    FROM messages m
                    WHERE m.conversation_id = c.id
                    ORDER BY m.created_at DESC, m.id DESC
                    LIMIT 1
                ) lm ON TRUE
                LEFT JOIN users u
                    ON u.id = CASE WHEN c.user_low = $1 THEN c.user_high ELSE c.user_low END
                WHERE c.user_low = $1 OR c.user_high = $1
                ORDER BY COALESCE(lm.created_at, c.created_at) DESC, c.id DESC
                "#,
                &[&user_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                id: row.get("id"),
                other_user_id: row.get("other_user_id"),
                other_user_name: row
                    .get::<_, Option<String>>("other_user_name")
                    .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string()),
                other_user_avatar: row.get("other_user_avatar"),
                last_message: row.get("last_message"),
                last_message_time: row.get("last_message_time"),
                listing_id: row.get("listing_id"),
                listing_type: row.get("listing_type"),
                listing_title: row.get("listing_title"),
                listing_image: row.get("listing_image"),
            })
            .collect())
    }

    async fn messages_for_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<MessageView>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS},
                           s.name AS sender_name, s.avatar AS sender_avatar,
                           r.name AS receiver_name, r.avatar AS receiver_avatar
                    FROM messages m
                    LEFT JOIN users s ON s.id = m.sender_id
                    LEFT JOIN users r ON r.id = m.receiver_id
                    WHERE m.conversation_id = $1
                    ORDER BY m.created_at ASC, m.id ASC
                    "#
                ),
                &[&conversation_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| MessageView {
                message: Self::message_from_row(row),
                sender_name: row
                    .get::<_, Option<String>>("sender_name")
                    .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string()),
                sender_avatar: row.get("sender_avatar"),
                receiver_name: row
                    .get::<_, Option<String>>("receiver_name")
                    .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string()),
                receiver_avatar: row.get("receiver_avatar"),
            })
            .collect())
    }
}
