use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use event_schema::WireReaction as Reaction;
use event_schema::{
    Attachment, MessageContent, MessageFormatting, ParticipantRole, WireMessage,
};

/// Replacement note shown in place of a tombstoned message.
pub const TOMBSTONE_NOTE: &str = "This message was removed";

/// Identity of a locally cached message.
///
/// A message is born with a client-generated `Local` id and swaps to the
/// authoritative `Server` id when its ack arrives. The swap happens in place;
/// the two ids never coexist in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum MessageId {
    Local(Uuid),
    Server(Uuid),
}

impl MessageId {
    pub fn raw(&self) -> Uuid {
        match self {
            MessageId::Local(id) | MessageId::Server(id) => *id,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, MessageId::Local(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    fn rank(&self) -> u8 {
        match self {
            DeliveryStatus::Sending => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Delivered => 2,
            DeliveryStatus::Read => 3,
            // Terminal; not part of the forward chain.
            DeliveryStatus::Failed => u8::MAX,
        }
    }

    /// Advance along sending → sent → delivered → read, or to the terminal
    /// `Failed`. Returns false (and leaves `self` untouched) for regressions
    /// and for anything after `Failed` — an out-of-order receipt is ignored,
    /// and only an explicit retry leaves the failed state.
    pub fn advance(&mut self, next: DeliveryStatus) -> bool {
        if matches!(self, DeliveryStatus::Failed) {
            return false;
        }
        if matches!(next, DeliveryStatus::Failed) || next.rank() > self.rank() {
            *self = next;
            return true;
        }
        false
    }
}

/// A message as cached by the conversation store.
///
/// Entries are never physically removed: moderation and deletion leave a
/// tombstone in place so ordering and reply references stay intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: ParticipantRole,
    /// Server-assigned ordering key; `None` until the ack arrives.
    pub sequence: Option<i64>,
    pub content: MessageContent,
    pub formatting: MessageFormatting,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<Reaction>,
    pub reply_to: Option<Uuid>,
    pub delivery: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub tombstoned: bool,
    pub flagged: bool,
}

impl Message {
    /// Build the optimistic local entry appended before the server has seen
    /// the send.
    #[allow(clippy::too_many_arguments)]
    pub fn optimistic(
        temp_id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_role: ParticipantRole,
        content: MessageContent,
        formatting: MessageFormatting,
        attachments: Vec<Attachment>,
        reply_to: Option<Uuid>,
    ) -> Self {
        Self {
            id: MessageId::Local(temp_id),
            conversation_id,
            sender_id,
            sender_role,
            sequence: None,
            content,
            formatting,
            attachments,
            reactions: Vec::new(),
            reply_to,
            delivery: DeliveryStatus::Sending,
            created_at: Utc::now(),
            edited_at: None,
            tombstoned: false,
            flagged: false,
        }
    }

    pub fn from_wire(wire: WireMessage) -> Self {
        Self {
            id: MessageId::Server(wire.id),
            conversation_id: wire.conversation_id,
            sender_id: wire.sender_id,
            sender_role: wire.sender_role,
            sequence: Some(wire.sequence),
            content: wire.content,
            formatting: wire.formatting,
            attachments: wire.attachments,
            reactions: wire.reactions,
            reply_to: wire.reply_to,
            delivery: DeliveryStatus::Delivered,
            created_at: wire.created_at,
            edited_at: wire.edited_at,
            tombstoned: wire.tombstoned,
            flagged: wire.flagged,
        }
    }

    /// Fold the ack into the optimistic entry: server identity and sequence
    /// replace the temp id at the same position, status moves to `Sent`.
    pub fn confirm(&mut self, server_id: Uuid, sequence: i64, created_at: DateTime<Utc>) {
        self.id = MessageId::Server(server_id);
        self.sequence = Some(sequence);
        self.created_at = created_at;
        self.delivery.advance(DeliveryStatus::Sent);
    }

    /// Soft-delete in place, preserving position and reply references.
    pub fn tombstone(&mut self) {
        self.content = MessageContent::System {
            note: TOMBSTONE_NOTE.to_string(),
        };
        self.formatting = MessageFormatting::default();
        self.attachments.clear();
        self.tombstoned = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn own_message() -> Message {
        Message::optimistic(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            ParticipantRole::Member,
            MessageContent::text("hello"),
            MessageFormatting::default(),
            vec![],
            None,
        )
    }

    #[test]
    fn test_delivery_only_moves_forward() {
        let mut status = DeliveryStatus::Sending;
        assert!(status.advance(DeliveryStatus::Sent));
        assert!(status.advance(DeliveryStatus::Delivered));
        assert!(status.advance(DeliveryStatus::Read));

        // A late delivered receipt must not regress a read message.
        assert!(!status.advance(DeliveryStatus::Delivered));
        assert_eq!(status, DeliveryStatus::Read);
    }

    #[test]
    fn test_delivery_skips_are_allowed() {
        // receipt.read can arrive without a delivered receipt first.
        let mut status = DeliveryStatus::Sent;
        assert!(status.advance(DeliveryStatus::Read));
        assert_eq!(status, DeliveryStatus::Read);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut status = DeliveryStatus::Sending;
        assert!(status.advance(DeliveryStatus::Failed));
        assert!(!status.advance(DeliveryStatus::Sent));
        assert!(!status.advance(DeliveryStatus::Read));
        assert_eq!(status, DeliveryStatus::Failed);
    }

    #[test]
    fn test_confirm_swaps_identity_in_place() {
        let mut message = own_message();
        let temp = message.id.raw();
        assert!(message.id.is_local());
        assert_eq!(message.sequence, None);

        let server_id = Uuid::new_v4();
        message.confirm(server_id, 42, Utc::now());

        assert_eq!(message.id, MessageId::Server(server_id));
        assert_ne!(message.id.raw(), temp);
        assert_eq!(message.sequence, Some(42));
        assert_eq!(message.delivery, DeliveryStatus::Sent);
    }

    #[test]
    fn test_tombstone_keeps_reply_reference() {
        let reply_target = Uuid::new_v4();
        let mut message = own_message();
        message.reply_to = Some(reply_target);

        message.tombstone();

        assert!(message.tombstoned);
        assert_eq!(message.reply_to, Some(reply_target));
        match &message.content {
            MessageContent::System { note } => assert_eq!(note, TOMBSTONE_NOTE),
            other => panic!("unexpected content: {:?}", other),
        }
    }
}
