use crate::error::AppError;
use crate::models::{ListingNotification, ListingSnapshot, MessageNotification, MessageView};
use crate::services::dispatch::DispatchRequest;
use crate::services::listing_broadcast::ListingPosted;
use crate::store::ReadTarget;
use serde::{Deserialize, Serialize};

/// Inbound WebSocket events from client to server
///
/// Frames look like `{"event": "send_message", "data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WsInboundEvent {
    Authenticate(AuthenticatePayload),
    SendMessage(SendMessagePayload),
    MarkAsRead(MarkAsReadPayload),
    Typing(TypingPayload),
    #[serde(alias = "new_ad_posted")]
    NewListingPosted(ListingPosted),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticatePayload {
    #[serde(alias = "userId")]
    pub user_id: i64,
}

/// Wire form of a chat message. Accepts the legacy `vehicle_*` fields
/// alongside the generic `listing_*` ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessagePayload {
    #[serde(default)]
    pub sender_id: Option<i64>,
    pub receiver_id: i64,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(default)]
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub listing_id: Option<i64>,
    #[serde(default)]
    pub listing_type: Option<String>,
    #[serde(default)]
    pub listing_title: Option<String>,
    #[serde(default)]
    pub listing_image: Option<String>,
    #[serde(default)]
    pub vehicle_id: Option<i64>,
    #[serde(default)]
    pub vehicle_title: Option<String>,
    #[serde(default)]
    pub vehicle_image: Option<String>,
}

impl SendMessagePayload {
    /// Listing snapshot with generic fields winning over the vehicle aliases
    pub fn listing_snapshot(&self) -> ListingSnapshot {
        let listing_id = self.listing_id.or(self.vehicle_id);
        let listing_type = self
            .listing_type
            .clone()
            .or_else(|| self.vehicle_id.map(|_| "vehicle".to_string()));
        ListingSnapshot {
            listing_id,
            listing_type,
            listing_title: self.listing_title.clone().or_else(|| self.vehicle_title.clone()),
            listing_image: self.listing_image.clone().or_else(|| self.vehicle_image.clone()),
        }
    }

    pub fn into_request(self, sender_id: i64) -> DispatchRequest {
        let listing = self.listing_snapshot();
        DispatchRequest {
            sender_id,
            receiver_id: self.receiver_id,
            body: self.body,
            conversation_id: self.conversation_id,
            listing,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkAsReadPayload {
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub reader_id: Option<i64>,
}

impl MarkAsReadPayload {
    /// A message id wins over the conversation form. The conversation form
    /// falls back to `authenticated` when no reader is given.
    pub fn target(&self, authenticated: Option<i64>) -> Result<ReadTarget, AppError> {
        if let Some(message_id) = self.message_id {
            return Ok(ReadTarget::Message { message_id });
        }
        let conversation_id = self.conversation_id.ok_or_else(|| {
            AppError::BadRequest("message_id or conversation_id is required".into())
        })?;
        let reader_id = self
            .reader_id
            .or(authenticated)
            .ok_or_else(|| AppError::BadRequest("reader_id is required".into()))?;
        Ok(ReadTarget::Conversation {
            conversation_id,
            reader_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypingPayload {
    #[serde(default)]
    pub sender_id: Option<i64>,
    pub receiver_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Acknowledgement for `mark_as_read`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkReadAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl MarkReadAck {
    pub fn committed(updated: u64) -> Self {
        Self {
            success: true,
            updated: Some(updated),
            error: None,
            retryable: None,
            retry_after_ms: None,
        }
    }

    pub fn failed(error: &AppError, retry_after_ms: Option<u64>) -> Self {
        let retryable = error.is_retryable();
        Self {
            success: false,
            updated: None,
            error: Some(error.to_string()),
            retryable: Some(retryable),
            retry_after_ms: if retryable { retry_after_ms } else { None },
        }
    }
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WsOutboundEvent {
    UserStatusChange {
        user_id: i64,
        status: PresenceStatus,
    },
    /// Full message, delivered to an online receiver
    NewMessage(MessageView),
    /// Send confirmation echoed to the sending session
    MessageSent(MessageView),
    MessageNotification(MessageNotification),
    UserTyping {
        sender_id: i64,
    },
    MessagesRead {
        conversation_id: i64,
        reader_id: i64,
    },
    #[serde(rename = "new_ad_notification")]
    NewListingNotification(ListingNotification),
    MarkAsReadResult(MarkReadAck),
    Error {
        message: String,
        retryable: bool,
    },
}

impl WsOutboundEvent {
    pub fn from_error(err: &AppError) -> Self {
        WsOutboundEvent::Error {
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}
