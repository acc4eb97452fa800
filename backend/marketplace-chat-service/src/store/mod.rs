//! Persistence gateway
//!
//! Thin query interface over durable chat state (conversations, messages)
//! and the read-only user directory. Every method is a single round trip or
//! a single transaction; orchestration lives in `services`.

pub mod memory;
pub mod postgres;

use crate::error::StoreError;
use crate::models::{
    Conversation, ConversationSummary, ListingRef, Message, MessageView, NewMessage, UserPair,
    UserProfile,
};
use async_trait::async_trait;

pub use memory::InMemoryChatStore;
pub use postgres::PgChatStore;

/// What a mark-read operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    /// A single message, whoever it was addressed to
    Message { message_id: i64 },
    /// Every unread message addressed to `reader_id` in the conversation
    Conversation { conversation_id: i64, reader_id: i64 },
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError>;

    /// Display info for the given ids. Unknown ids are simply absent from the result.
    async fn user_profiles(&self, user_ids: &[i64]) -> Result<Vec<UserProfile>, StoreError>;

    /// Exact match on pair and listing; `None` only matches general conversations.
    async fn find_conversation(
        &self,
        pair: UserPair,
        listing: Option<&ListingRef>,
    ) -> Result<Option<i64>, StoreError>;

    /// Fails with [`StoreError::UniqueViolation`] when the (pair, listing) row already exists.
    async fn insert_conversation(
        &self,
        pair: UserPair,
        listing: Option<&ListingRef>,
    ) -> Result<i64, StoreError>;

    async fn get_conversation(&self, conversation_id: i64)
        -> Result<Option<Conversation>, StoreError>;

    /// Persists an unread message and returns the stored row
    async fn insert_message(&self, message: &NewMessage) -> Result<Message, StoreError>;

    async fn get_message(&self, message_id: i64) -> Result<Option<Message>, StoreError>;

    /// Sets `is_read` on the target's unread messages inside one transaction.
    ///
    /// Returns the number of rows that flipped from unread to read. Rows that
    /// are already read are left untouched.
    async fn mark_read(&self, target: ReadTarget) -> Result<u64, StoreError>;

    /// Distinct senders of messages addressed to `reader_id` in the conversation
    async fn senders_to_reader(
        &self,
        conversation_id: i64,
        reader_id: i64,
    ) -> Result<Vec<i64>, StoreError>;

    /// Conversations the user takes part in, most recent activity first
    async fn conversations_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationSummary>, StoreError>;

    /// Conversation history in send order, enriched with participant display info
    async fn messages_for_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<MessageView>, StoreError>;
}
