pub mod conversation;
pub mod message;
pub mod notification;
pub mod user;

pub use conversation::{Conversation, ConversationSummary, ListingRef, UserPair};
pub use message::{ListingSnapshot, Message, MessageView, NewMessage};
pub use notification::{ListingNotification, MessageNotification};
pub use user::UserProfile;
