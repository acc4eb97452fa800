use super::conversation::ListingRef;
use super::user::UserProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listing details captured on the message at send time.
///
/// The snapshot is never refreshed, so history keeps showing what the
/// listing looked like when the message was written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSnapshot {
    pub listing_id: Option<i64>,
    pub listing_type: Option<String>,
    pub listing_title: Option<String>,
    pub listing_image: Option<String>,
}

impl ListingSnapshot {
    /// The listing reference, present only when both id and type are known.
    pub fn listing_ref(&self) -> Option<ListingRef> {
        match (self.listing_id, &self.listing_type) {
            (Some(id), Some(kind)) => Some(ListingRef::new(id, kind.clone())),
            _ => None,
        }
    }
}

/// Message row as inserted; id and timestamp are assigned by storage
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub body: String,
    pub listing: ListingSnapshot,
}

/// Message struct matching the persisted row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(flatten)]
    pub listing: ListingSnapshot,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted message plus display info for both participants.
///
/// This is the "full message" payload sent as `new_message` / `message_sent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub receiver_name: String,
    pub receiver_avatar: Option<String>,
}

impl MessageView {
    pub fn new(message: Message, sender: &UserProfile, receiver: &UserProfile) -> Self {
        Self {
            message,
            sender_name: sender.name.clone(),
            sender_avatar: sender.avatar.clone(),
            receiver_name: receiver.name.clone(),
            receiver_avatar: receiver.avatar.clone(),
        }
    }
}
