//! Message dispatch: validate, resolve the conversation, persist, enrich,
//! then deliver to the receiver (or queue a notification) and confirm to
//! the sender.
//!
//! Nothing is delivered until the message row is durably stored.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    ListingSnapshot, Message, MessageNotification, MessageView, NewMessage, UserProfile,
};
use crate::services::conversation_resolver::ConversationResolver;
use crate::services::presence::{DeliveryOutcome, PresenceRegistry};
use crate::store::ChatStore;
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::SessionHandle;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub body: String,
    pub conversation_id: Option<i64>,
    pub listing: ListingSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub message: MessageView,
    pub notification: MessageNotification,
    pub delivery: DeliveryOutcome,
}

#[derive(Clone)]
pub struct MessageDispatcher {
    store: Arc<dyn ChatStore>,
    resolver: ConversationResolver,
    presence: PresenceRegistry,
}

impl MessageDispatcher {
    pub fn new(
        store: Arc<dyn ChatStore>,
        resolver: ConversationResolver,
        presence: PresenceRegistry,
    ) -> Self {
        Self {
            store,
            resolver,
            presence,
        }
    }

    /// Run the full pipeline. `origin` receives the `message_sent`
    /// confirmation when given.
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        origin: Option<&SessionHandle>,
    ) -> AppResult<DispatchOutcome> {
        let result = self.run(request, origin).await;
        if result.is_err() {
            metrics::MESSAGES_DISPATCHED_TOTAL
                .with_label_values(&["failed"])
                .inc();
        }
        result
    }

    async fn run(
        &self,
        request: DispatchRequest,
        origin: Option<&SessionHandle>,
    ) -> AppResult<DispatchOutcome> {
        self.validate(&request).await?;

        let conversation_id = self.conversation_for(&request).await?;

        let message = self
            .store
            .insert_message(&NewMessage {
                conversation_id,
                sender_id: request.sender_id,
                receiver_id: request.receiver_id,
                body: request.body,
                listing: request.listing,
            })
            .await
            .map_err(|e| {
                warn!(error = %e, sender_id = request.sender_id, "failed to persist message");
                AppError::Persistence(e.to_string())
            })?;

        let view = self.enrich(message).await;
        let notification = MessageNotification::for_message(&view, Utc::now());

        let delivery = self
            .presence
            .deliver_or_queue(
                request.receiver_id,
                vec![
                    WsOutboundEvent::NewMessage(view.clone()),
                    WsOutboundEvent::MessageNotification(notification.clone()),
                ],
                notification.clone(),
            )
            .await;

        if let Some(origin) = origin {
            origin.send(WsOutboundEvent::MessageSent(view.clone()));
        }

        metrics::MESSAGES_DISPATCHED_TOTAL
            .with_label_values(&[delivery.as_str()])
            .inc();
        info!(
            message_id = view.message.id,
            conversation_id,
            sender_id = view.message.sender_id,
            receiver_id = view.message.receiver_id,
            delivery = delivery.as_str(),
            "message dispatched"
        );

        Ok(DispatchOutcome {
            message: view,
            notification,
            delivery,
        })
    }

    async fn validate(&self, request: &DispatchRequest) -> AppResult<()> {
        if request.body.trim().is_empty() {
            return Err(AppError::BadRequest("message body must not be empty".into()));
        }
        if request.sender_id == request.receiver_id {
            return Err(AppError::BadRequest("cannot send a message to yourself".into()));
        }
        if !self.store.user_exists(request.receiver_id).await? {
            return Err(AppError::UnknownRecipient(request.receiver_id));
        }
        Ok(())
    }

    /// Use the supplied conversation if it belongs to the pair, otherwise
    /// resolve one from the pair and listing.
    async fn conversation_for(&self, request: &DispatchRequest) -> AppResult<i64> {
        if let Some(id) = request.conversation_id {
            let conversation = self
                .store
                .get_conversation(id)
                .await?
                .ok_or_else(|| AppError::BadRequest(format!("conversation {id} does not exist")))?;
            let pair = conversation.participants;
            if !(pair.contains(request.sender_id) && pair.contains(request.receiver_id)) {
                return Err(AppError::BadRequest(format!(
                    "conversation {id} does not belong to these participants"
                )));
            }
            return Ok(id);
        }

        let listing = request.listing.listing_ref();
        self.resolver
            .resolve_or_create(request.sender_id, request.receiver_id, listing.as_ref())
            .await
    }

    /// Attach display info. A directory fault falls back to placeholders;
    /// the message is already stored and must still go out.
    async fn enrich(&self, message: Message) -> MessageView {
        let ids = [message.sender_id, message.receiver_id];
        let profiles = match self.store.user_profiles(&ids).await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(error = %e, message_id = message.id, "profile lookup failed, using placeholders");
                Vec::new()
            }
        };
        let profile_for = |id: i64| {
            profiles
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .unwrap_or_else(|| UserProfile::placeholder(id))
        };

        let sender = profile_for(message.sender_id);
        let receiver = profile_for(message.receiver_id);
        MessageView::new(message, &sender, &receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UNKNOWN_USER_NAME;
    use crate::services::pending::PendingNotificationQueue;
    use crate::store::InMemoryChatStore;

    struct Harness {
        store: Arc<InMemoryChatStore>,
        presence: PresenceRegistry,
        dispatcher: MessageDispatcher,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryChatStore::with_users([
            UserProfile::new(1, "Ana", Some("ana.png".into())),
            UserProfile::new(2, "Ben", None),
        ]));
        let presence = PresenceRegistry::new(PendingNotificationQueue::new(100));
        let dispatcher = MessageDispatcher::new(
            store.clone(),
            ConversationResolver::new(store.clone()),
            presence.clone(),
        );
        Harness {
            store,
            presence,
            dispatcher,
        }
    }

    fn request(body: &str) -> DispatchRequest {
        DispatchRequest {
            sender_id: 1,
            receiver_id: 2,
            body: body.into(),
            conversation_id: None,
            listing: ListingSnapshot::default(),
        }
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_rejected_before_persisting() {
        let h = harness();
        let mut req = request("hi");
        req.receiver_id = 99;

        let err = h.dispatcher.dispatch(req, None).await.unwrap_err();
        assert_eq!(err, AppError::UnknownRecipient(99));
        assert_eq!(h.store.message_count(), 0);
        assert_eq!(h.store.conversation_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_body_and_self_messages_are_bad_requests() {
        let h = harness();
        assert!(matches!(
            h.dispatcher.dispatch(request("   "), None).await,
            Err(AppError::BadRequest(_))
        ));

        let mut req = request("hi");
        req.receiver_id = 1;
        assert!(matches!(
            h.dispatcher.dispatch(req, None).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_emits_nothing() {
        let h = harness();
        let (receiver, mut receiver_rx) = SessionHandle::channel();
        let (sender, mut sender_rx) = SessionHandle::channel();
        h.presence.register(2, receiver).await;
        h.presence.register(1, sender.clone()).await;
        while receiver_rx.try_recv().is_ok() {}
        while sender_rx.try_recv().is_ok() {}
        h.store.fail_message_inserts(true);

        let err = h.dispatcher.dispatch(request("hi"), Some(&sender)).await.unwrap_err();

        assert!(matches!(err, AppError::Persistence(_)));
        assert!(receiver_rx.try_recv().is_err());
        assert!(sender_rx.try_recv().is_err());
        assert!(h.presence.pending().is_empty(2).await);
    }

    #[tokio::test]
    async fn test_profile_fault_uses_placeholder_names() {
        let h = harness();
        h.store.fail_profile_lookups(true);

        let outcome = h.dispatcher.dispatch(request("hi"), None).await.unwrap();

        assert_eq!(outcome.message.sender_name, UNKNOWN_USER_NAME);
        assert_eq!(outcome.message.receiver_name, UNKNOWN_USER_NAME);
        assert_eq!(outcome.delivery, DeliveryOutcome::Queued);
        assert_eq!(h.store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_foreign_conversation_id_is_rejected() {
        let h = harness();
        h.store.add_user(UserProfile::new(3, "Cy", None));
        let foreign = ConversationResolver::new(h.store.clone())
            .resolve_or_create(2, 3, None)
            .await
            .unwrap();

        let mut req = request("hi");
        req.conversation_id = Some(foreign);
        assert!(matches!(
            h.dispatcher.dispatch(req, None).await,
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(h.store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_supplied_conversation_is_reused() {
        let h = harness();
        let first = h.dispatcher.dispatch(request("one"), None).await.unwrap();

        let mut req = request("two");
        req.conversation_id = Some(first.message.message.conversation_id);
        let second = h.dispatcher.dispatch(req, None).await.unwrap();

        assert_eq!(
            first.message.message.conversation_id,
            second.message.message.conversation_id
        );
        assert_eq!(h.store.conversation_count(), 1);
    }
}
