use crate::error::{AppError, AppResult};
use crate::services::{
    DispatchOutcome, ListingNotifier, ListingPosted, MessageDispatcher, PresenceRegistry,
    ReadReceiptUpdater,
};
use crate::websocket::message_types::{
    MarkAsReadPayload, MarkReadAck, SendMessagePayload, TypingPayload, WsInboundEvent,
    WsOutboundEvent,
};
use crate::websocket::{SessionHandle, SessionId};
use tracing::{debug, info, warn};

/// Entry points for everything a connected session can do.
///
/// Each method takes the calling session's handle plus the user it has
/// authenticated as, if any. Replies go out on the session's own channel.
#[derive(Clone)]
pub struct SessionEvents {
    presence: PresenceRegistry,
    dispatcher: MessageDispatcher,
    read_receipts: ReadReceiptUpdater,
    listings: ListingNotifier,
}

impl SessionEvents {
    pub fn new(
        presence: PresenceRegistry,
        dispatcher: MessageDispatcher,
        read_receipts: ReadReceiptUpdater,
        listings: ListingNotifier,
    ) -> Self {
        Self {
            presence,
            dispatcher,
            read_receipts,
            listings,
        }
    }

    pub async fn connect(&self, session: &SessionHandle) {
        self.presence.connect(session.clone()).await;
        debug!(session = %session.id(), "session connected");
    }

    pub async fn disconnect(&self, session_id: SessionId) {
        let user_id = self.presence.disconnect(session_id).await;
        debug!(session = %session_id, ?user_id, "session disconnected");
    }

    /// Parse one text frame and run it. Returns the user the session is
    /// authenticated as afterwards.
    pub async fn handle_frame(
        &self,
        session: &SessionHandle,
        authenticated: Option<i64>,
        frame: &str,
    ) -> Option<i64> {
        let event = match serde_json::from_str::<WsInboundEvent>(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(session = %session.id(), error = %e, "failed to parse WS message");
                session.send(WsOutboundEvent::from_error(&AppError::BadRequest(format!(
                    "invalid event: {e}"
                ))));
                return authenticated;
            }
        };

        match event {
            WsInboundEvent::Authenticate(payload) => {
                return Some(self.authenticate(session, payload.user_id).await);
            }
            WsInboundEvent::SendMessage(payload) => {
                // Failures are reported to the session inside send_message.
                let _ = self.send_message(session, authenticated, payload).await;
            }
            WsInboundEvent::MarkAsRead(payload) => {
                self.mark_as_read(session, authenticated, payload).await;
            }
            WsInboundEvent::Typing(payload) => {
                if let Err(e) = self.typing(authenticated, payload).await {
                    session.send(WsOutboundEvent::from_error(&e));
                }
            }
            WsInboundEvent::NewListingPosted(payload) => {
                if let Err(e) = self.new_listing_posted(session, authenticated, payload).await {
                    session.send(WsOutboundEvent::from_error(&e));
                }
            }
        }
        authenticated
    }

    /// Bind the session to `user_id`; queued notifications follow
    pub async fn authenticate(&self, session: &SessionHandle, user_id: i64) -> i64 {
        let flushed = self.presence.register(user_id, session.clone()).await;
        info!(user_id, session = %session.id(), flushed, "session authenticated");
        user_id
    }

    pub async fn send_message(
        &self,
        session: &SessionHandle,
        authenticated: Option<i64>,
        payload: SendMessagePayload,
    ) -> AppResult<DispatchOutcome> {
        let result = match acting_user(authenticated, payload.sender_id) {
            Ok(sender_id) => {
                self.dispatcher
                    .dispatch(payload.into_request(sender_id), Some(session))
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!(session = %session.id(), error = %e, "send_message failed");
            session.send(WsOutboundEvent::from_error(e));
        }
        result
    }

    pub async fn mark_as_read(
        &self,
        session: &SessionHandle,
        authenticated: Option<i64>,
        payload: MarkAsReadPayload,
    ) -> MarkReadAck {
        let result = match acting_user(authenticated, payload.reader_id) {
            Ok(reader_id) => match payload.target(Some(reader_id)) {
                Ok(target) => self.read_receipts.mark_read_as(reader_id, target).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            debug!(session = %session.id(), error = %e, "mark_as_read rejected or failed");
        }

        let ack = match result {
            Ok(updated) => MarkReadAck::committed(updated),
            Err(e) => {
                let retry_after_ms = self
                    .read_receipts
                    .retry_after(&e)
                    .map(|d| d.as_millis() as u64);
                MarkReadAck::failed(&e, retry_after_ms)
            }
        };
        session.send(WsOutboundEvent::MarkAsReadResult(ack.clone()));
        ack
    }

    /// Relay a typing indicator. Returns whether the receiver was online.
    pub async fn typing(&self, authenticated: Option<i64>, payload: TypingPayload) -> AppResult<bool> {
        let sender_id = acting_user(authenticated, payload.sender_id)?;
        Ok(self
            .presence
            .send_to_user(payload.receiver_id, WsOutboundEvent::UserTyping { sender_id })
            .await)
    }

    /// Broadcast a new listing. Only the authenticated poster may announce it.
    pub async fn new_listing_posted(
        &self,
        session: &SessionHandle,
        authenticated: Option<i64>,
        payload: ListingPosted,
    ) -> AppResult<usize> {
        let poster_id = acting_user(authenticated, Some(payload.poster_id))?;
        debug!(poster_id, listing_id = payload.listing_id, "new listing posted");
        Ok(self.listings.notify(payload, Some(session.id())).await)
    }
}

/// The user a session acts as. A claimed id must match the authenticated one.
fn acting_user(authenticated: Option<i64>, claimed: Option<i64>) -> AppResult<i64> {
    match (authenticated, claimed) {
        (Some(user), None) => Ok(user),
        (Some(user), Some(claimed)) if user == claimed => Ok(user),
        _ => Err(AppError::Unauthorized),
    }
}
