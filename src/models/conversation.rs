use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::{Message, MessageId};
use event_schema::{
    ConversationKind, MessageContent, ParticipantRole, PresenceStatus, WireConversation,
    WireParticipant,
};

/// Cached display fields for one conversation member. The user directory
/// owns the authoritative record; we only mirror what the list view needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: ParticipantRole,
    pub presence: PresenceStatus,
}

impl From<WireParticipant> for Participant {
    fn from(wire: WireParticipant) -> Self {
        Self {
            user_id: wire.user_id,
            display_name: wire.display_name,
            role: wire.role,
            presence: wire.presence,
        }
    }
}

/// Lightweight reference to the newest message, for list ordering and the
/// sidebar snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePreview {
    pub id: MessageId,
    pub sender_id: Uuid,
    pub snippet: String,
    pub at: DateTime<Utc>,
}

impl MessagePreview {
    pub fn of(message: &Message) -> Self {
        let snippet = match &message.content {
            MessageContent::Text { body } => body.chars().take(80).collect(),
            MessageContent::Emoji { shortcode } => shortcode.clone(),
            MessageContent::File { .. } => "[file]".to_string(),
            MessageContent::Image { .. } => "[image]".to_string(),
            MessageContent::System { note } => note.clone(),
        };
        Self {
            id: message.id,
            sender_id: message.sender_id,
            snippet,
            at: message.created_at,
        }
    }
}

/// One cached conversation. Owned by the conversation store; never deleted,
/// only archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub participants: Vec<Participant>,
    pub last_message: Option<MessagePreview>,
    pub unread_count: u32,
    pub muted: bool,
    pub pinned: bool,
    pub emergency: bool,
    pub archived: bool,
    /// Highest sequence this user has read; receipts are emitted against it.
    pub last_read_sequence: i64,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn from_wire(wire: WireConversation) -> Self {
        let last_message = wire
            .last_message
            .map(|m| MessagePreview::of(&Message::from_wire(m)));
        Self {
            id: wire.id,
            kind: wire.kind,
            participants: wire.participants.into_iter().map(Participant::from).collect(),
            last_message,
            unread_count: 0,
            muted: false,
            pinned: false,
            emergency: wire.emergency,
            archived: wire.archived,
            last_read_sequence: 0,
            updated_at: wire.updated_at,
        }
    }

    /// Ordering key for the list view: newest message, falling back to the
    /// conversation's own update time.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.at)
            .unwrap_or(self.updated_at)
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }
}
