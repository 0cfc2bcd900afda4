//! Shared wire schema for the realtime messaging core.
//!
//! Everything that crosses the persistent channel (server pushes and client
//! operations) or the HTTP side channel is defined here, so the core crate
//! and any embedder agree on one serialized representation.

pub mod events;
pub mod message;

pub use events::{ClientOp, ServerEvent};
pub use message::{
    Attachment, ColorRange, ConversationKind, LinkRange, MessageContent, MessageFormatting,
    ParticipantRole, PresenceStatus, Range, WireConversation, WireMessage, WireParticipant,
    WireReaction,
};
