use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{
    Attachment, MessageContent, MessageFormatting, PresenceStatus, WireConversation, WireMessage,
};

/// Events pushed by the server over the persistent channel.
///
/// This enum provides a type-safe way to work with channel events across the
/// whole client, ensuring consistent dispatch by event kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "message.new")]
    MessageNew { message: WireMessage },

    /// Acknowledgement correlating a submitted send (by its client temp id)
    /// with its authoritative server identity and sequence.
    #[serde(rename = "message.ack")]
    MessageAck {
        conversation_id: Uuid,
        temp_id: Uuid,
        message_id: Uuid,
        sequence: i64,
        created_at: DateTime<Utc>,
    },

    /// Also used by the moderation service: a removal notice arrives as an
    /// ordinary edit with `flagged` set.
    #[serde(rename = "message.edited")]
    MessageEdited {
        conversation_id: Uuid,
        message_id: Uuid,
        content: MessageContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formatting: Option<MessageFormatting>,
        edited_at: DateTime<Utc>,
        #[serde(default)]
        flagged: bool,
    },

    #[serde(rename = "message.deleted")]
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
        deleted_at: DateTime<Utc>,
    },

    #[serde(rename = "receipt.delivered")]
    ReceiptDelivered {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    },

    /// A participant has read everything up to `sequence`.
    #[serde(rename = "receipt.read")]
    ReceiptRead {
        conversation_id: Uuid,
        user_id: Uuid,
        sequence: i64,
    },

    #[serde(rename = "typing.start")]
    TypingStart {
        conversation_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },

    #[serde(rename = "typing.stop")]
    TypingStop {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    #[serde(rename = "reaction.added")]
    ReactionAdded {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    #[serde(rename = "reaction.removed")]
    ReactionRemoved {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    #[serde(rename = "presence.update")]
    PresenceUpdate {
        user_id: Uuid,
        status: PresenceStatus,
    },

    #[serde(rename = "conversation.created")]
    ConversationCreated { conversation: WireConversation },
}

impl ServerEvent {
    /// The conversation this event belongs to, when it is scoped to one.
    /// `presence.update` is the only conversation-agnostic event.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            ServerEvent::MessageNew { message } => Some(message.conversation_id),
            ServerEvent::MessageAck {
                conversation_id, ..
            }
            | ServerEvent::MessageEdited {
                conversation_id, ..
            }
            | ServerEvent::MessageDeleted {
                conversation_id, ..
            }
            | ServerEvent::ReceiptDelivered {
                conversation_id, ..
            }
            | ServerEvent::ReceiptRead {
                conversation_id, ..
            }
            | ServerEvent::TypingStart {
                conversation_id, ..
            }
            | ServerEvent::TypingStop {
                conversation_id, ..
            }
            | ServerEvent::ReactionAdded {
                conversation_id, ..
            }
            | ServerEvent::ReactionRemoved {
                conversation_id, ..
            } => Some(*conversation_id),
            ServerEvent::PresenceUpdate { .. } => None,
            ServerEvent::ConversationCreated { conversation } => Some(conversation.id),
        }
    }

    /// The wire tag for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::MessageNew { .. } => "message.new",
            ServerEvent::MessageAck { .. } => "message.ack",
            ServerEvent::MessageEdited { .. } => "message.edited",
            ServerEvent::MessageDeleted { .. } => "message.deleted",
            ServerEvent::ReceiptDelivered { .. } => "receipt.delivered",
            ServerEvent::ReceiptRead { .. } => "receipt.read",
            ServerEvent::TypingStart { .. } => "typing.start",
            ServerEvent::TypingStop { .. } => "typing.stop",
            ServerEvent::ReactionAdded { .. } => "reaction.added",
            ServerEvent::ReactionRemoved { .. } => "reaction.removed",
            ServerEvent::PresenceUpdate { .. } => "presence.update",
            ServerEvent::ConversationCreated { .. } => "conversation.created",
        }
    }
}

/// Operations submitted by the client over the persistent channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientOp {
    #[serde(rename = "message.send")]
    SendMessage {
        conversation_id: Uuid,
        temp_id: Uuid,
        content: MessageContent,
        #[serde(default, skip_serializing_if = "MessageFormatting::is_empty")]
        formatting: MessageFormatting,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<Uuid>,
    },

    #[serde(rename = "message.edit")]
    EditMessage {
        conversation_id: Uuid,
        message_id: Uuid,
        content: MessageContent,
        #[serde(default, skip_serializing_if = "MessageFormatting::is_empty")]
        formatting: MessageFormatting,
    },

    #[serde(rename = "message.delete")]
    DeleteMessage {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    #[serde(rename = "receipt.read")]
    ReadReceipt {
        conversation_id: Uuid,
        sequence: i64,
    },

    #[serde(rename = "typing.start")]
    TypingStart { conversation_id: Uuid },

    #[serde(rename = "typing.stop")]
    TypingStop { conversation_id: Uuid },

    #[serde(rename = "reaction.add")]
    AddReaction {
        conversation_id: Uuid,
        message_id: Uuid,
        emoji: String,
    },

    #[serde(rename = "reaction.remove")]
    RemoveReaction {
        conversation_id: Uuid,
        message_id: Uuid,
        emoji: String,
    },
}

impl ClientOp {
    pub fn conversation_id(&self) -> Uuid {
        match self {
            ClientOp::SendMessage {
                conversation_id, ..
            }
            | ClientOp::EditMessage {
                conversation_id, ..
            }
            | ClientOp::DeleteMessage {
                conversation_id, ..
            }
            | ClientOp::ReadReceipt {
                conversation_id, ..
            }
            | ClientOp::TypingStart { conversation_id }
            | ClientOp::TypingStop { conversation_id }
            | ClientOp::AddReaction {
                conversation_id, ..
            }
            | ClientOp::RemoveReaction {
                conversation_id, ..
            } => *conversation_id,
        }
    }

    pub fn op_type(&self) -> &'static str {
        match self {
            ClientOp::SendMessage { .. } => "message.send",
            ClientOp::EditMessage { .. } => "message.edit",
            ClientOp::DeleteMessage { .. } => "message.delete",
            ClientOp::ReadReceipt { .. } => "receipt.read",
            ClientOp::TypingStart { .. } => "typing.start",
            ClientOp::TypingStop { .. } => "typing.stop",
            ClientOp::AddReaction { .. } => "reaction.add",
            ClientOp::RemoveReaction { .. } => "reaction.remove",
        }
    }

    /// The temp id used for ack correlation, for ops that carry one.
    pub fn temp_id(&self) -> Option<Uuid> {
        match self {
            ClientOp::SendMessage { temp_id, .. } => Some(*temp_id),
            _ => None,
        }
    }
}
