use super::message::MessageView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bodies longer than this are cut down for previews
pub const PREVIEW_MAX_CHARS: usize = 50;
const PREVIEW_ELLIPSIS: &str = "...";

pub const MESSAGE_NOTIFICATION_KIND: &str = "message";

/// Compact preview of a message body, at most [`PREVIEW_MAX_CHARS`] characters
/// including the trailing ellipsis.
pub fn message_preview(body: &str) -> String {
    if body.chars().count() <= PREVIEW_MAX_CHARS {
        return body.to_string();
    }
    let keep = PREVIEW_MAX_CHARS - PREVIEW_ELLIPSIS.chars().count();
    let mut preview: String = body.chars().take(keep).collect();
    preview.push_str(PREVIEW_ELLIPSIS);
    preview
}

/// Display-ready summary of a new message.
///
/// Delivered live after the full message, or queued for an offline receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub message_id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub message_preview: String,
    pub listing_id: Option<i64>,
    pub listing_type: Option<String>,
    pub listing_title: Option<String>,
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageNotification {
    pub fn for_message(view: &MessageView, timestamp: DateTime<Utc>) -> Self {
        let message = &view.message;
        let preview = message_preview(&message.body);
        Self {
            kind: MESSAGE_NOTIFICATION_KIND.to_string(),
            message_id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_name: view.sender_name.clone(),
            message_preview: preview.clone(),
            listing_id: message.listing.listing_id,
            listing_type: message.listing.listing_type.clone(),
            listing_title: message.listing.listing_title.clone(),
            title: format!("New message from {}", view.sender_name),
            body: preview,
            timestamp,
        }
    }
}

/// Broadcast sent to everyone online when a new listing goes up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingNotification {
    pub listing_id: i64,
    pub listing_type: String,
    pub listing_title: String,
    pub listing_price: String,
    pub listing_image: Option<String>,
    pub poster_id: i64,
    pub poster_name: String,
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_body_is_kept_verbatim() {
        let body = "Hello, is this still available?";
        assert_eq!(message_preview(body), body);
    }

    #[test]
    fn test_body_of_exactly_fifty_chars_is_not_truncated() {
        let body = "a".repeat(50);
        assert_eq!(message_preview(&body), body);
    }

    #[test]
    fn test_long_body_is_truncated_to_47_plus_ellipsis() {
        let body = "b".repeat(80);
        let preview = message_preview(&body);
        assert_eq!(preview.chars().count(), 50);
        assert_eq!(preview, format!("{}...", "b".repeat(47)));
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let body = "é".repeat(60);
        let preview = message_preview(&body);
        assert_eq!(preview, format!("{}...", "é".repeat(47)));
    }
}
