use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversation kind as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationKind {
    Direct,
    Group,
    TherapySession,
    CrisisSupport,
}

/// Role a participant holds inside a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Member,
    Therapist,
    Moderator,
}

impl ParticipantRole {
    /// Moderators may remove other users' messages.
    pub fn can_moderate(&self) -> bool {
        matches!(self, ParticipantRole::Moderator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

/// Half-open character range `[start, end)` into a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRange {
    #[serde(flatten)]
    pub range: Range,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRange {
    #[serde(flatten)]
    pub range: Range,
    pub value: String,
}

/// Per-category style ranges attached to a message body.
///
/// Within one category the ranges are non-overlapping and sorted by start
/// offset; across categories overlap is expected (bold+italic on one span).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFormatting {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bold: Vec<Range>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub italic: Vec<Range>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub underline: Vec<Range>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strikethrough: Vec<Range>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code: Vec<Range>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<LinkRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub colors: Vec<ColorRange>,
}

impl MessageFormatting {
    pub fn is_empty(&self) -> bool {
        self.bold.is_empty()
            && self.italic.is_empty()
            && self.underline.is_empty()
            && self.strikethrough.is_empty()
            && self.code.is_empty()
            && self.links.is_empty()
            && self.colors.is_empty()
    }
}

/// Attachment descriptor produced by the attachment service.
///
/// The messaging core treats this as opaque data: validation, scanning and
/// encryption happen before the descriptor ever reaches us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Message body, keyed by message kind with exhaustive render-time handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text { body: String },
    Emoji { shortcode: String },
    File { caption: Option<String> },
    Image { caption: Option<String> },
    System { note: String },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        MessageContent::Text { body: body.into() }
    }

    /// Plain-text bodies are the only editable kind.
    pub fn is_plain_text(&self) -> bool {
        matches!(self, MessageContent::Text { .. })
    }

    /// True when there is no user-visible payload at all.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text { body } => body.trim().is_empty(),
            MessageContent::Emoji { shortcode } => shortcode.trim().is_empty(),
            MessageContent::File { .. } | MessageContent::Image { .. } => false,
            MessageContent::System { note } => note.trim().is_empty(),
        }
    }
}

/// One (user, emoji) reaction as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireReaction {
    pub user_id: Uuid,
    pub emoji: String,
}

/// Server representation of a message, used by `message.new` pushes and by
/// the paginated history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: ParticipantRole,
    pub sequence: i64,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "MessageFormatting::is_empty")]
    pub formatting: MessageFormatting,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<WireReaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tombstoned: bool,
    #[serde(default)]
    pub flagged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireParticipant {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: ParticipantRole,
    pub presence: PresenceStatus,
}

/// Server representation of a conversation, used by `conversation.created`
/// pushes and the conversation list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireConversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub participants: Vec<WireParticipant>,
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub archived: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<WireMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_kind_tagging() {
        let content = MessageContent::text("hello");
        let json = serde_json::to_string(&content).unwrap();
        assert!(json.contains(r#""kind":"text""#));

        let back: MessageContent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn test_empty_content_detection() {
        assert!(MessageContent::text("   ").is_empty());
        assert!(!MessageContent::text("hi").is_empty());
        assert!(!MessageContent::File { caption: None }.is_empty());
    }

    #[test]
    fn test_formatting_defaults_round_trip() {
        let mut formatting = MessageFormatting::default();
        formatting.bold.push(Range::new(0, 5));

        let json = serde_json::to_string(&formatting).unwrap();
        // Untouched categories are omitted entirely.
        assert!(!json.contains("italic"));

        let back: MessageFormatting = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bold, vec![Range::new(0, 5)]);
        assert!(back.italic.is_empty());
    }

    #[test]
    fn test_link_range_flattens_offsets() {
        let link = LinkRange {
            range: Range::new(3, 9),
            url: "https://example.com".into(),
        };
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["start"], 3);
        assert_eq!(json["end"], 9);
        assert_eq!(json["url"], "https://example.com");
    }

    #[test]
    fn test_role_moderation() {
        assert!(ParticipantRole::Moderator.can_moderate());
        assert!(!ParticipantRole::Therapist.can_moderate());
        assert!(!ParticipantRole::Member.can_moderate());
    }
}
