pub mod api;
pub mod conversation_store;
pub mod message_lifecycle;
pub mod typing;

pub use conversation_store::{ConversationStore, StoreChange};
pub use message_lifecycle::{MessageLifecycleManager, SendTicket};
pub use typing::{TypingCoordinator, TypingIndicator};
