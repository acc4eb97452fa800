pub mod conversation_resolver;
pub mod dispatch;
pub mod listing_broadcast;
pub mod pending;
pub mod presence;
pub mod read_receipts;
pub mod retry;

// Re-export key types for convenience
pub use conversation_resolver::ConversationResolver;
pub use dispatch::{DispatchOutcome, DispatchRequest, MessageDispatcher};
pub use listing_broadcast::{format_price, ListingNotifier, ListingPosted};
pub use pending::PendingNotificationQueue;
pub use presence::{DeliveryOutcome, PresenceRegistry};
pub use read_receipts::ReadReceiptUpdater;
pub use retry::{BackoffPolicy, FixedJitter, JitterSource, RandJitter};
