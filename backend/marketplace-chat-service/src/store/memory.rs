//! Process-local gateway used by the test suites and `STORE_BACKEND=memory`.
//!
//! Mirrors the constraints of the Postgres schema (pair/listing uniqueness,
//! monotonic `is_read`) and lets tests inject storage faults.

use super::{ChatStore, ReadTarget};
use crate::error::StoreError;
use crate::models::user::UNKNOWN_USER_NAME;
use crate::models::{
    Conversation, ConversationSummary, ListingRef, Message, MessageView, NewMessage, UserPair,
    UserProfile,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MemoryState {
    users: HashMap<i64, UserProfile>,
    conversations: BTreeMap<i64, Conversation>,
    messages: BTreeMap<i64, Message>,
    next_conversation_id: i64,
    next_message_id: i64,
}

impl MemoryState {
    fn find_conversation(&self, pair: UserPair, listing: Option<&ListingRef>) -> Option<i64> {
        self.conversations
            .values()
            .find(|c| c.participants == pair && c.listing.as_ref() == listing)
            .map(|c| c.id)
    }

    fn create_conversation(&mut self, pair: UserPair, listing: Option<&ListingRef>) -> i64 {
        self.next_conversation_id += 1;
        let id = self.next_conversation_id;
        self.conversations.insert(
            id,
            Conversation {
                id,
                participants: pair,
                listing: listing.cloned(),
                created_at: Utc::now(),
            },
        );
        id
    }

    fn profile_or_placeholder(&self, user_id: i64) -> UserProfile {
        self.users
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserProfile::placeholder(user_id))
    }
}

/// Injected storage faults
#[derive(Debug, Default)]
struct FaultPlan {
    fail_user_lookups: bool,
    fail_profile_lookups: bool,
    fail_message_inserts: bool,
    /// Next insert_conversation behaves as if a concurrent writer won the race
    conversation_insert_race: bool,
    transient_mark_read_failures: u32,
    permanent_mark_read_failure: bool,
    mark_read_calls: u32,
}

#[derive(Default)]
pub struct InMemoryChatStore {
    state: Mutex<MemoryState>,
    faults: Mutex<FaultPlan>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I>(users: I) -> Self
    where
        I: IntoIterator<Item = UserProfile>,
    {
        let store = Self::new();
        for user in users {
            store.add_user(user);
        }
        store
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, FaultPlan> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, user: UserProfile) {
        self.state().users.insert(user.id, user);
    }

    pub fn conversation_count(&self) -> usize {
        self.state().conversations.len()
    }

    pub fn message_count(&self) -> usize {
        self.state().messages.len()
    }

    pub fn fail_user_lookups(&self, fail: bool) {
        self.faults().fail_user_lookups = fail;
    }

    pub fn fail_profile_lookups(&self, fail: bool) {
        self.faults().fail_profile_lookups = fail;
    }

    pub fn fail_message_inserts(&self, fail: bool) {
        self.faults().fail_message_inserts = fail;
    }

    /// The next conversation insert creates the row on behalf of a
    /// "concurrent" writer and then reports a unique violation.
    pub fn race_next_conversation_insert(&self) {
        self.faults().conversation_insert_race = true;
    }

    /// The next `count` mark-read transactions fail with a lock conflict
    pub fn inject_transient_mark_read_failures(&self, count: u32) {
        self.faults().transient_mark_read_failures = count;
    }

    pub fn fail_mark_read_permanently(&self, fail: bool) {
        self.faults().permanent_mark_read_failure = fail;
    }

    /// Number of mark-read transactions attempted so far
    pub fn mark_read_calls(&self) -> u32 {
        self.faults().mark_read_calls
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        if self.faults().fail_user_lookups {
            return Err(StoreError::Backend("user lookup failed".into()));
        }
        Ok(self.state().users.contains_key(&user_id))
    }

    async fn user_profiles(&self, user_ids: &[i64]) -> Result<Vec<UserProfile>, StoreError> {
        if self.faults().fail_profile_lookups {
            return Err(StoreError::Backend("profile lookup failed".into()));
        }
        let state = self.state();
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }

    async fn find_conversation(
        &self,
        pair: UserPair,
        listing: Option<&ListingRef>,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self.state().find_conversation(pair, listing))
    }

    async fn insert_conversation(
        &self,
        pair: UserPair,
        listing: Option<&ListingRef>,
    ) -> Result<i64, StoreError> {
        let raced = std::mem::take(&mut self.faults().conversation_insert_race);
        let mut state = self.state();

        if raced {
            if state.find_conversation(pair, listing).is_none() {
                state.create_conversation(pair, listing);
            }
            return Err(StoreError::UniqueViolation(
                "conversations_pair_listing_key".into(),
            ));
        }

        if state.find_conversation(pair, listing).is_some() {
            return Err(StoreError::UniqueViolation(
                "conversations_pair_listing_key".into(),
            ));
        }
        Ok(state.create_conversation(pair, listing))
    }

    async fn get_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self.state().conversations.get(&conversation_id).cloned())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, StoreError> {
        if self.faults().fail_message_inserts {
            return Err(StoreError::Backend("message insert failed".into()));
        }

        let mut state = self.state();
        if !state.conversations.contains_key(&message.conversation_id) {
            return Err(StoreError::Backend(format!(
                "conversation {} does not exist",
                message.conversation_id
            )));
        }

        state.next_message_id += 1;
        let stored = Message {
            id: state.next_message_id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            body: message.body.clone(),
            listing: message.listing.clone(),
            is_read: false,
            created_at: Utc::now(),
        };
        state.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_message(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        Ok(self.state().messages.get(&message_id).cloned())
    }

    async fn mark_read(&self, target: ReadTarget) -> Result<u64, StoreError> {
        {
            let mut faults = self.faults();
            faults.mark_read_calls += 1;
            if faults.permanent_mark_read_failure {
                return Err(StoreError::Backend("mark read failed".into()));
            }
            if faults.transient_mark_read_failures > 0 {
                faults.transient_mark_read_failures -= 1;
                return Err(StoreError::TransientConflict("deadlock detected".into()));
            }
        }

        let mut state = self.state();
        let mut updated = 0;
        for message in state.messages.values_mut() {
            let matches = match target {
                ReadTarget::Message { message_id } => message.id == message_id,
                ReadTarget::Conversation {
                    conversation_id,
                    reader_id,
                } => message.conversation_id == conversation_id && message.receiver_id == reader_id,
            };
            if matches && !message.is_read {
                message.is_read = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn senders_to_reader(
        &self,
        conversation_id: i64,
        reader_id: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let state = self.state();
        let senders: BTreeSet<i64> = state
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id && m.receiver_id == reader_id)
            .map(|m| m.sender_id)
            .collect();
        Ok(senders.into_iter().collect())
    }

    async fn conversations_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let state = self.state();
        let mut summaries: Vec<(chrono::DateTime<Utc>, ConversationSummary)> = state
            .conversations
            .values()
            .filter_map(|c| {
                let other = c.participants.other(user_id)?;
                let last = state
                    .messages
                    .values()
                    .filter(|m| m.conversation_id == c.id)
                    .max_by_key(|m| (m.created_at, m.id));
                let other_profile = state.profile_or_placeholder(other);
                let activity = last.map(|m| m.created_at).unwrap_or(c.created_at);
                Some((
                    activity,
                    ConversationSummary {
                        id: c.id,
                        other_user_id: other,
                        other_user_name: other_profile.name,
                        other_user_avatar: other_profile.avatar,
                        last_message: last.map(|m| m.body.clone()),
                        last_message_time: last.map(|m| m.created_at),
                        listing_id: c.listing.as_ref().map(|l| l.listing_id),
                        listing_type: c.listing.as_ref().map(|l| l.listing_type.clone()),
                        listing_title: last.and_then(|m| m.listing.listing_title.clone()),
                        listing_image: last.and_then(|m| m.listing.listing_image.clone()),
                    },
                ))
            })
            .collect();

        summaries.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.id.cmp(&a.1.id)));
        Ok(summaries.into_iter().map(|(_, s)| s).collect())
    }

    async fn messages_for_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<MessageView>, StoreError> {
        let state = self.state();
        let mut messages: Vec<&Message> = state
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.id));

        Ok(messages
            .into_iter()
            .map(|m| {
                let sender = state.profile_or_placeholder(m.sender_id);
                let receiver = state.profile_or_placeholder(m.receiver_id);
                MessageView::new(m.clone(), &sender, &receiver)
            })
            .collect())
    }
}

impl std::fmt::Debug for InMemoryChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("InMemoryChatStore")
            .field("users", &state.users.len())
            .field("conversations", &state.conversations.len())
            .field("messages", &state.messages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingSnapshot;

    fn store() -> InMemoryChatStore {
        InMemoryChatStore::with_users([
            UserProfile::new(1, "Ana", None),
            UserProfile::new(2, "Ben", None),
        ])
    }

    fn new_message(conversation_id: i64, sender_id: i64, receiver_id: i64) -> NewMessage {
        NewMessage {
            conversation_id,
            sender_id,
            receiver_id,
            body: "hello".into(),
            listing: ListingSnapshot::default(),
        }
    }

    #[tokio::test]
    async fn test_general_and_listing_conversations_are_distinct() {
        let store = store();
        let pair = UserPair::new(1, 2);
        let listing = ListingRef::new(42, "vehicle");

        let general = store.insert_conversation(pair, None).await.unwrap();
        assert_eq!(store.find_conversation(pair, Some(&listing)).await.unwrap(), None);

        let specific = store.insert_conversation(pair, Some(&listing)).await.unwrap();
        assert_ne!(general, specific);
        assert_eq!(store.find_conversation(pair, None).await.unwrap(), Some(general));
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_unique_violation() {
        let store = store();
        let pair = UserPair::new(2, 1);
        store.insert_conversation(pair, None).await.unwrap();

        let err = store.insert_conversation(UserPair::new(1, 2), None).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_only_counts_unread_rows() {
        let store = store();
        let conversation = store.insert_conversation(UserPair::new(1, 2), None).await.unwrap();
        store.insert_message(&new_message(conversation, 1, 2)).await.unwrap();
        store.insert_message(&new_message(conversation, 2, 1)).await.unwrap();

        let target = ReadTarget::Conversation {
            conversation_id: conversation,
            reader_id: 2,
        };
        assert_eq!(store.mark_read(target).await.unwrap(), 1);
        assert_eq!(store.mark_read(target).await.unwrap(), 0);
        assert_eq!(store.senders_to_reader(conversation, 2).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_insert_into_missing_conversation_fails() {
        let store = store();
        let err = store.insert_message(&new_message(99, 1, 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_history_uses_placeholder_for_unknown_users() {
        let store = store();
        let conversation = store.insert_conversation(UserPair::new(1, 3), None).await.unwrap();
        store.insert_message(&new_message(conversation, 1, 3)).await.unwrap();

        let history = store.messages_for_conversation(conversation).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender_name, "Ana");
        assert_eq!(history[0].receiver_name, UNKNOWN_USER_NAME);
    }
}
