use crate::error::{AppError, AppResult, StoreError};
use crate::models::{ListingRef, UserPair};
use crate::store::ChatStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Finds or creates the conversation for a (pair, listing) combination.
///
/// Uniqueness is enforced by storage: the insert goes first and a unique
/// violation (an existing row, or a concurrent writer winning the race) is
/// answered by reading back that row.
#[derive(Clone)]
pub struct ConversationResolver {
    store: Arc<dyn ChatStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_or_create(
        &self,
        user_a: i64,
        user_b: i64,
        listing: Option<&ListingRef>,
    ) -> AppResult<i64> {
        let pair = UserPair::new(user_a, user_b);

        match self.store.insert_conversation(pair, listing).await {
            Ok(id) => {
                info!(
                    conversation_id = id,
                    user_low = pair.low(),
                    user_high = pair.high(),
                    listing_id = listing.map(|l| l.listing_id),
                    "created conversation"
                );
                Ok(id)
            }
            Err(StoreError::UniqueViolation(detail)) => {
                debug!(%detail, "conversation already exists, re-reading");
                self.store
                    .find_conversation(pair, listing)
                    .await?
                    .ok_or_else(|| {
                        AppError::Persistence(
                            "conversation vanished after unique violation".into(),
                        )
                    })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserProfile;
    use crate::store::InMemoryChatStore;

    fn setup() -> (Arc<InMemoryChatStore>, ConversationResolver) {
        let store = Arc::new(InMemoryChatStore::with_users([
            UserProfile::new(1, "Ana", None),
            UserProfile::new(2, "Ben", None),
        ]));
        let resolver = ConversationResolver::new(store.clone());
        (store, resolver)
    }

    #[tokio::test]
    async fn test_pair_order_does_not_matter() {
        let (store, resolver) = setup();
        let first = resolver.resolve_or_create(1, 2, None).await.unwrap();
        let second = resolver.resolve_or_create(2, 1, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn test_each_listing_gets_its_own_conversation() {
        let (store, resolver) = setup();
        let car = ListingRef::new(10, "vehicle");
        let flat = ListingRef::new(10, "rental");

        let general = resolver.resolve_or_create(1, 2, None).await.unwrap();
        let about_car = resolver.resolve_or_create(1, 2, Some(&car)).await.unwrap();
        let about_flat = resolver.resolve_or_create(2, 1, Some(&flat)).await.unwrap();

        assert_ne!(general, about_car);
        assert_ne!(about_car, about_flat);
        assert_eq!(store.conversation_count(), 3);
        assert_eq!(resolver.resolve_or_create(2, 1, Some(&car)).await.unwrap(), about_car);
    }

    #[tokio::test]
    async fn test_lost_insert_race_returns_winner() {
        let (store, resolver) = setup();
        let listing = ListingRef::new(5, "vehicle");
        store.race_next_conversation_insert();

        let id = resolver.resolve_or_create(1, 2, Some(&listing)).await.unwrap();

        assert_eq!(store.conversation_count(), 1);
        assert_eq!(
            store.find_conversation(UserPair::new(1, 2), Some(&listing)).await.unwrap(),
            Some(id)
        );
    }
}
