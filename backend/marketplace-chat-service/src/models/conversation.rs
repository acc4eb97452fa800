use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a marketplace listing a conversation is about.
///
/// A conversation without a listing is a "general" conversation; it is
/// represented as `Option<ListingRef>::None` and never matches a listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingRef {
    pub listing_id: i64,
    pub listing_type: String,
}

impl ListingRef {
    pub fn new(listing_id: i64, listing_type: impl Into<String>) -> Self {
        Self {
            listing_id,
            listing_type: listing_type.into(),
        }
    }
}

/// Unordered pair of participants, stored low id first so lookups do not
/// depend on who sent the first message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserPair {
    low: i64,
    high: i64,
}

impl UserPair {
    pub fn new(a: i64, b: i64) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    pub fn contains(&self, user_id: i64) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The participant that is not `user_id`, if `user_id` is part of the pair.
    pub fn other(&self, user_id: i64) -> Option<i64> {
        if self.low == user_id {
            Some(self.high)
        } else if self.high == user_id {
            Some(self.low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub participants: UserPair,
    pub listing: Option<ListingRef>,
    pub created_at: DateTime<Utc>,
}

/// Row of the "conversations for user" projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub other_user_id: i64,
    pub other_user_name: String,
    pub other_user_avatar: Option<String>,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub listing_id: Option<i64>,
    pub listing_type: Option<String>,
    pub listing_title: Option<String>,
    pub listing_image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_order_independent() {
        assert_eq!(UserPair::new(9, 2), UserPair::new(2, 9));
        let pair = UserPair::new(9, 2);
        assert_eq!(pair.low(), 2);
        assert_eq!(pair.high(), 9);
    }

    #[test]
    fn test_pair_other() {
        let pair = UserPair::new(1, 2);
        assert_eq!(pair.other(1), Some(2));
        assert_eq!(pair.other(2), Some(1));
        assert_eq!(pair.other(3), None);
        assert!(pair.contains(2));
        assert!(!pair.contains(3));
    }
}
