pub mod conversation;
pub mod message;

pub use conversation::{Conversation, MessagePreview, Participant};
pub use message::{DeliveryStatus, Message, MessageId, Reaction};
