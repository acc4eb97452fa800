use crate::{
    config::Config,
    handlers::SessionEvents,
    services::{
        BackoffPolicy, ConversationResolver, ListingNotifier, MessageDispatcher,
        PendingNotificationQueue, PresenceRegistry, ReadReceiptUpdater,
    },
    store::ChatStore,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub presence: PresenceRegistry,
    pub events: SessionEvents,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire every service over one store and one presence registry
    pub fn new(config: Config, store: Arc<dyn ChatStore>) -> Self {
        let presence = PresenceRegistry::new(PendingNotificationQueue::new(
            config.pending_notifications_per_user,
        ));
        let policy = BackoffPolicy::new(
            config.read_receipts.max_retries,
            config.read_receipts.base_delay,
        );

        let dispatcher = MessageDispatcher::new(
            store.clone(),
            ConversationResolver::new(store.clone()),
            presence.clone(),
        );
        let read_receipts = ReadReceiptUpdater::new(store.clone(), presence.clone(), policy);
        let listings = ListingNotifier::new(store.clone(), presence.clone());
        let events = SessionEvents::new(presence.clone(), dispatcher, read_receipts, listings);

        Self {
            store,
            presence,
            events,
            config: Arc::new(config),
        }
    }
}
