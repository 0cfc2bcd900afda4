//! Cached conversation and message state.
//!
//! The store is the single source of truth: every mutation funnels through
//! its methods, the UI only reads and subscribes. Messages are kept ordered
//! by server sequence regardless of arrival order; optimistic sends wait at
//! the tail until their ack assigns them a sequence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::conversation::{Conversation, MessagePreview};
use crate::models::message::{DeliveryStatus, Message, MessageId};
use crate::reactions::ReactionAggregator;
use event_schema::{MessageContent, MessageFormatting, ServerEvent, WireConversation, WireMessage};

/// What changed, for subscribers deciding what to re-render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    ConversationList,
    Messages(Uuid),
}

#[derive(Default)]
struct StoreInner {
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Vec<Message>>,
    active: Option<Uuid>,
}

pub struct ConversationStore {
    current_user: Uuid,
    inner: RwLock<StoreInner>,
    watchers: RwLock<Vec<UnboundedSender<StoreChange>>>,
}

impl ConversationStore {
    pub fn new(current_user: Uuid) -> Arc<Self> {
        Arc::new(Self {
            current_user,
            inner: RwLock::new(StoreInner::default()),
            watchers: RwLock::new(Vec::new()),
        })
    }

    pub fn current_user(&self) -> Uuid {
        self.current_user
    }

    /// Subscribe to change notifications. Dead receivers are cleaned up on
    /// the next notification.
    pub async fn subscribe(&self) -> UnboundedReceiver<StoreChange> {
        let (tx, rx) = unbounded_channel();
        self.watchers.write().await.push(tx);
        rx
    }

    async fn notify(&self, change: StoreChange) {
        let mut guard = self.watchers.write().await;
        guard.retain(|watcher| watcher.send(change).is_ok());
    }

    /// Seed the cache from the side-channel conversation list.
    pub async fn load_conversations(&self, conversations: Vec<WireConversation>) {
        {
            let mut inner = self.inner.write().await;
            for wire in conversations {
                let conversation = Conversation::from_wire(wire);
                // A reload must not clobber local flags on known threads.
                inner
                    .conversations
                    .entry(conversation.id)
                    .or_insert(conversation);
            }
        }
        self.notify(StoreChange::ConversationList).await;
    }

    /// Ordered list view: pinned first, then last activity descending.
    /// Archived conversations are excluded here but stay searchable.
    pub async fn list(&self) -> Vec<Conversation> {
        let inner = self.inner.read().await;
        let mut conversations: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| !c.archived)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| b.activity_at().cmp(&a.activity_at()))
        });
        conversations
    }

    /// Case-insensitive search over participant names and message bodies.
    /// Includes archived conversations.
    pub async fn search(&self, term: &str) -> Vec<Conversation> {
        let needle = term.to_lowercase();
        let inner = self.inner.read().await;

        inner
            .conversations
            .values()
            .filter(|conversation| {
                let in_names = conversation
                    .participants
                    .iter()
                    .any(|p| p.display_name.to_lowercase().contains(&needle));
                let in_messages = inner
                    .messages
                    .get(&conversation.id)
                    .map(|messages| {
                        messages.iter().any(|m| match &m.content {
                            MessageContent::Text { body } => {
                                body.to_lowercase().contains(&needle)
                            }
                            _ => false,
                        })
                    })
                    .unwrap_or(false);
                in_names || in_messages
            })
            .cloned()
            .collect()
    }

    /// Activate a conversation: unread drops to zero and the highest seen
    /// sequence is returned so the caller can emit the read receipt.
    pub async fn select(&self, conversation_id: Uuid) -> Option<i64> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&conversation_id) {
            tracing::warn!(%conversation_id, "select on unknown conversation");
            return None;
        }
        inner.active = Some(conversation_id);

        let highest_seen = inner
            .messages
            .get(&conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|m| m.sequence)
            .max();

        if let Some(conversation) = inner.conversations.get_mut(&conversation_id) {
            conversation.unread_count = 0;
            if let Some(sequence) = highest_seen {
                conversation.last_read_sequence = conversation.last_read_sequence.max(sequence);
            }
        }
        drop(inner);

        self.notify(StoreChange::ConversationList).await;
        highest_seen
    }

    pub async fn active(&self) -> Option<Uuid> {
        self.inner.read().await.active
    }

    pub async fn conversation(&self, conversation_id: Uuid) -> Option<Conversation> {
        self.inner.read().await.conversations.get(&conversation_id).cloned()
    }

    /// Current message window for a conversation, in surfacing order.
    pub async fn messages(&self, conversation_id: Uuid) -> Vec<Message> {
        self.inner
            .read()
            .await
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn message(&self, conversation_id: Uuid, raw_id: Uuid) -> Option<Message> {
        self.inner
            .read()
            .await
            .messages
            .get(&conversation_id)
            .and_then(|messages| messages.iter().find(|m| m.id.raw() == raw_id))
            .cloned()
    }

    pub async fn set_muted(&self, conversation_id: Uuid, muted: bool) {
        if self
            .update_conversation(conversation_id, |c| c.muted = muted)
            .await
        {
            self.notify(StoreChange::ConversationList).await;
        }
    }

    pub async fn set_pinned(&self, conversation_id: Uuid, pinned: bool) {
        if self
            .update_conversation(conversation_id, |c| c.pinned = pinned)
            .await
        {
            self.notify(StoreChange::ConversationList).await;
        }
    }

    /// Conversations are never deleted, only archived out of the list view.
    pub async fn archive(&self, conversation_id: Uuid) {
        if self
            .update_conversation(conversation_id, |c| c.archived = true)
            .await
        {
            self.notify(StoreChange::ConversationList).await;
        }
    }

    async fn update_conversation(
        &self,
        conversation_id: Uuid,
        mutate: impl FnOnce(&mut Conversation),
    ) -> bool {
        let mut inner = self.inner.write().await;
        match inner.conversations.get_mut(&conversation_id) {
            Some(conversation) => {
                mutate(conversation);
                true
            }
            None => {
                tracing::warn!(%conversation_id, "update on unknown conversation");
                false
            }
        }
    }

    /// Append an optimistic local send at the tail of its conversation.
    pub async fn append_optimistic(&self, message: Message) {
        let conversation_id = message.conversation_id;
        {
            let mut inner = self.inner.write().await;
            let preview = MessagePreview::of(&message);
            inner
                .messages
                .entry(conversation_id)
                .or_default()
                .push(message);
            if let Some(conversation) = inner.conversations.get_mut(&conversation_id) {
                conversation.last_message = Some(preview);
                conversation.updated_at = Utc::now();
            }
        }
        self.notify(StoreChange::Messages(conversation_id)).await;
        self.notify(StoreChange::ConversationList).await;
    }

    /// Fold the ack into the optimistic entry at its existing position.
    /// Returns false when no matching temp id exists (duplicate ack).
    pub async fn confirm_ack(
        &self,
        conversation_id: Uuid,
        temp_id: Uuid,
        server_id: Uuid,
        sequence: i64,
        created_at: DateTime<Utc>,
    ) -> bool {
        let confirmed = {
            let mut inner = self.inner.write().await;
            let Some(messages) = inner.messages.get_mut(&conversation_id) else {
                return false;
            };
            match messages
                .iter_mut()
                .find(|m| m.id == MessageId::Local(temp_id))
            {
                Some(message) => {
                    message.confirm(server_id, sequence, created_at);
                    true
                }
                None => false,
            }
        };
        if confirmed {
            self.notify(StoreChange::Messages(conversation_id)).await;
        }
        confirmed
    }

    pub async fn set_delivery(
        &self,
        conversation_id: Uuid,
        temp_id: Uuid,
        status: DeliveryStatus,
    ) {
        let changed = {
            let mut inner = self.inner.write().await;
            inner
                .messages
                .get_mut(&conversation_id)
                .and_then(|messages| {
                    messages.iter_mut().find(|m| m.id.raw() == temp_id)
                })
                .map(|message| {
                    if matches!(status, DeliveryStatus::Sending) {
                        // Explicit retry resets the terminal failed state.
                        message.delivery = DeliveryStatus::Sending;
                        true
                    } else {
                        message.delivery.advance(status)
                    }
                })
                .unwrap_or(false)
        };
        if changed {
            self.notify(StoreChange::Messages(conversation_id)).await;
        }
    }

    /// Apply a caller-initiated edit that passed the lifecycle checks.
    pub async fn apply_local_edit(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        content: MessageContent,
        formatting: MessageFormatting,
        edited_at: DateTime<Utc>,
    ) {
        let applied = {
            let mut inner = self.inner.write().await;
            inner
                .messages
                .get_mut(&conversation_id)
                .and_then(|messages| messages.iter_mut().find(|m| m.id.raw() == message_id))
                .map(|message| {
                    message.content = content;
                    message.formatting = formatting;
                    message.edited_at = Some(edited_at);
                })
                .is_some()
        };
        if applied {
            self.notify(StoreChange::Messages(conversation_id)).await;
        }
    }

    /// Tombstone in place; position and reply references survive.
    pub async fn tombstone_message(&self, conversation_id: Uuid, message_id: Uuid) {
        let applied = {
            let mut inner = self.inner.write().await;
            inner
                .messages
                .get_mut(&conversation_id)
                .and_then(|messages| messages.iter_mut().find(|m| m.id.raw() == message_id))
                .map(Message::tombstone)
                .is_some()
        };
        if applied {
            self.notify(StoreChange::Messages(conversation_id)).await;
        }
    }

    /// Toggle the current user's reaction. Returns whether it is now active,
    /// or None when the message is unknown.
    pub async fn toggle_reaction(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> Option<bool> {
        let result = {
            let mut inner = self.inner.write().await;
            let user = self.current_user;
            inner
                .messages
                .get_mut(&conversation_id)
                .and_then(|messages| messages.iter_mut().find(|m| m.id.raw() == message_id))
                .map(|message| ReactionAggregator::toggle(&mut message.reactions, user, emoji))
        };
        if result.is_some() {
            self.notify(StoreChange::Messages(conversation_id)).await;
        }
        result
    }

    /// Merge a page of history (descending by sequence, as fetched) into the
    /// cached window. Known ids are skipped.
    pub async fn insert_history_page(&self, conversation_id: Uuid, page: Vec<WireMessage>) {
        {
            let mut inner = self.inner.write().await;
            let messages = inner.messages.entry(conversation_id).or_default();
            for wire in page {
                if messages.iter().any(|m| m.id.raw() == wire.id) {
                    continue;
                }
                Self::insert_by_sequence(messages, Message::from_wire(wire));
            }
        }
        self.notify(StoreChange::Messages(conversation_id)).await;
    }

    /// Overwrite a message with authoritative server state (conflict
    /// recovery), or insert it when the window does not hold it yet.
    pub async fn replace_authoritative(&self, wire: WireMessage) {
        let conversation_id = wire.conversation_id;
        {
            let mut inner = self.inner.write().await;
            let messages = inner.messages.entry(conversation_id).or_default();
            let message = Message::from_wire(wire);
            if let Some(existing) = messages
                .iter_mut()
                .find(|m| m.id.raw() == message.id.raw())
            {
                *existing = message;
            } else {
                Self::insert_by_sequence(messages, message);
            }
        }
        self.notify(StoreChange::Messages(conversation_id)).await;
    }

    /// Sequence-ordered insert: before the first message with a greater
    /// sequence, and always before the optimistic tail.
    fn insert_by_sequence(messages: &mut Vec<Message>, message: Message) {
        let sequence = message.sequence.unwrap_or(i64::MAX);
        let position = messages
            .iter()
            .position(|existing| match existing.sequence {
                Some(s) => s > sequence,
                None => true,
            })
            .unwrap_or(messages.len());
        messages.insert(position, message);
    }

    /// Fold one server push into cached state. Events for unknown targets
    /// are dropped with a warning; they never disturb well-formed state.
    pub async fn apply_incoming(&self, event: &ServerEvent) {
        match event {
            ServerEvent::MessageNew { message } => {
                self.apply_message_new(message.clone()).await;
            }
            ServerEvent::MessageEdited {
                conversation_id,
                message_id,
                content,
                formatting,
                edited_at,
                flagged,
            } => {
                // Moderation rewrites arrive here too and get no special
                // treatment beyond the flag they carry.
                let applied = {
                    let mut inner = self.inner.write().await;
                    inner
                        .messages
                        .get_mut(conversation_id)
                        .and_then(|messages| {
                            messages.iter_mut().find(|m| m.id.raw() == *message_id)
                        })
                        .map(|message| {
                            message.content = content.clone();
                            if let Some(formatting) = formatting {
                                message.formatting = formatting.clone();
                            }
                            message.edited_at = Some(*edited_at);
                            message.flagged |= flagged;
                        })
                        .is_some()
                };
                if applied {
                    self.notify(StoreChange::Messages(*conversation_id)).await;
                } else {
                    tracing::warn!(%message_id, "edit for unknown message dropped");
                }
            }
            ServerEvent::MessageDeleted {
                conversation_id,
                message_id,
                ..
            } => {
                self.tombstone_message(*conversation_id, *message_id).await;
            }
            ServerEvent::ReceiptDelivered {
                conversation_id,
                message_id,
                ..
            } => {
                self.set_delivery(*conversation_id, *message_id, DeliveryStatus::Delivered)
                    .await;
            }
            ServerEvent::ReceiptRead {
                conversation_id,
                user_id,
                sequence,
            } => {
                self.apply_read_receipt(*conversation_id, *user_id, *sequence)
                    .await;
            }
            ServerEvent::ReactionAdded {
                conversation_id,
                message_id,
                user_id,
                emoji,
            } => {
                let applied = {
                    let mut inner = self.inner.write().await;
                    inner
                        .messages
                        .get_mut(conversation_id)
                        .and_then(|messages| {
                            messages.iter_mut().find(|m| m.id.raw() == *message_id)
                        })
                        .map(|message| {
                            ReactionAggregator::apply_added(
                                &mut message.reactions,
                                *user_id,
                                emoji,
                            )
                        })
                        .is_some()
                };
                if applied {
                    self.notify(StoreChange::Messages(*conversation_id)).await;
                }
            }
            ServerEvent::ReactionRemoved {
                conversation_id,
                message_id,
                user_id,
                emoji,
            } => {
                let applied = {
                    let mut inner = self.inner.write().await;
                    inner
                        .messages
                        .get_mut(conversation_id)
                        .and_then(|messages| {
                            messages.iter_mut().find(|m| m.id.raw() == *message_id)
                        })
                        .map(|message| {
                            ReactionAggregator::apply_removed(
                                &mut message.reactions,
                                *user_id,
                                emoji,
                            )
                        })
                        .is_some()
                };
                if applied {
                    self.notify(StoreChange::Messages(*conversation_id)).await;
                }
            }
            ServerEvent::PresenceUpdate { user_id, status } => {
                {
                    let mut inner = self.inner.write().await;
                    for conversation in inner.conversations.values_mut() {
                        for participant in conversation
                            .participants
                            .iter_mut()
                            .filter(|p| p.user_id == *user_id)
                        {
                            participant.presence = *status;
                        }
                    }
                }
                self.notify(StoreChange::ConversationList).await;
            }
            ServerEvent::ConversationCreated { conversation } => {
                {
                    let mut inner = self.inner.write().await;
                    let incoming = Conversation::from_wire(conversation.clone());
                    inner.conversations.entry(incoming.id).or_insert(incoming);
                }
                self.notify(StoreChange::ConversationList).await;
            }
            // Ack correlation belongs to the lifecycle manager.
            ServerEvent::MessageAck { .. } => {}
            // Typing belongs to the coordinator.
            ServerEvent::TypingStart { .. } | ServerEvent::TypingStop { .. } => {}
        }
    }

    async fn apply_message_new(&self, wire: WireMessage) {
        let conversation_id = wire.conversation_id;
        let inserted = {
            let mut inner = self.inner.write().await;

            if !inner.conversations.contains_key(&conversation_id) {
                tracing::warn!(%conversation_id, "message for unknown conversation dropped");
                return;
            }

            let messages = inner.messages.entry(conversation_id).or_default();
            // Replay after reconnect must not duplicate entries.
            if messages.iter().any(|m| m.id.raw() == wire.id) {
                tracing::debug!(message_id = %wire.id, "duplicate message.new discarded");
                false
            } else {
                let message = Message::from_wire(wire);
                let preview = MessagePreview::of(&message);
                let from_current_user = message.sender_id == self.current_user;
                Self::insert_by_sequence(messages, message);

                let active = inner.active;
                if let Some(conversation) = inner.conversations.get_mut(&conversation_id) {
                    conversation.last_message = Some(preview);
                    conversation.updated_at = Utc::now();
                    if !from_current_user && active != Some(conversation_id) {
                        conversation.unread_count += 1;
                    }
                }
                true
            }
        };

        if inserted {
            self.notify(StoreChange::Messages(conversation_id)).await;
            self.notify(StoreChange::ConversationList).await;
        }
    }

    async fn apply_read_receipt(&self, conversation_id: Uuid, user_id: Uuid, sequence: i64) {
        if user_id == self.current_user {
            // Echo of our own receipt; just track the watermark.
            self.update_conversation(conversation_id, |c| {
                c.last_read_sequence = c.last_read_sequence.max(sequence);
            })
            .await;
            return;
        }

        let changed = {
            let mut inner = self.inner.write().await;
            let current_user = self.current_user;
            match inner.messages.get_mut(&conversation_id) {
                Some(messages) => {
                    let mut changed = false;
                    for message in messages.iter_mut().filter(|m| {
                        m.sender_id == current_user
                            && m.sequence.map(|s| s <= sequence).unwrap_or(false)
                    }) {
                        changed |= message.delivery.advance(DeliveryStatus::Read);
                    }
                    changed
                }
                None => false,
            }
        };
        if changed {
            self.notify(StoreChange::Messages(conversation_id)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_schema::{ConversationKind, ParticipantRole, PresenceStatus, WireParticipant};

    fn wire_conversation(id: Uuid, me: Uuid, other: Uuid) -> WireConversation {
        WireConversation {
            id,
            kind: ConversationKind::Direct,
            participants: vec![
                WireParticipant {
                    user_id: me,
                    display_name: "Me".into(),
                    role: ParticipantRole::Member,
                    presence: PresenceStatus::Online,
                },
                WireParticipant {
                    user_id: other,
                    display_name: "Jordan".into(),
                    role: ParticipantRole::Therapist,
                    presence: PresenceStatus::Online,
                },
            ],
            emergency: false,
            archived: false,
            updated_at: Utc::now(),
            last_message: None,
        }
    }

    fn wire_message(conversation_id: Uuid, sender_id: Uuid, sequence: i64) -> WireMessage {
        WireMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            sender_role: ParticipantRole::Member,
            sequence,
            content: MessageContent::text(format!("message {sequence}")),
            formatting: MessageFormatting::default(),
            attachments: vec![],
            reactions: vec![],
            reply_to: None,
            created_at: Utc::now(),
            edited_at: None,
            tombstoned: false,
            flagged: false,
        }
    }

    async fn seeded_store() -> (Arc<ConversationStore>, Uuid, Uuid) {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let store = ConversationStore::new(me);
        store
            .load_conversations(vec![wire_conversation(conversation_id, me, other)])
            .await;
        (store, conversation_id, other)
    }

    #[tokio::test]
    async fn test_unread_accounting_and_read_reset() {
        let (store, conversation_id, other) = seeded_store().await;

        for sequence in [11, 12, 13] {
            store
                .apply_incoming(&ServerEvent::MessageNew {
                    message: wire_message(conversation_id, other, sequence),
                })
                .await;
        }

        let conversation = store.conversation(conversation_id).await.unwrap();
        assert_eq!(conversation.unread_count, 3);

        // Selecting resets unread and reports the receipt watermark.
        let highest = store.select(conversation_id).await;
        assert_eq!(highest, Some(13));
        let conversation = store.conversation(conversation_id).await.unwrap();
        assert_eq!(conversation.unread_count, 0);
        assert_eq!(conversation.last_read_sequence, 13);
    }

    #[tokio::test]
    async fn test_inbound_while_selected_stays_read() {
        let (store, conversation_id, other) = seeded_store().await;
        store.select(conversation_id).await;

        store
            .apply_incoming(&ServerEvent::MessageNew {
                message: wire_message(conversation_id, other, 1),
            })
            .await;

        let conversation = store.conversation(conversation_id).await.unwrap();
        assert_eq!(conversation.unread_count, 0);
    }

    #[tokio::test]
    async fn test_out_of_order_arrival_is_resequenced() {
        let (store, conversation_id, other) = seeded_store().await;

        for sequence in [13, 11, 12] {
            store
                .apply_incoming(&ServerEvent::MessageNew {
                    message: wire_message(conversation_id, other, sequence),
                })
                .await;
        }

        let sequences: Vec<i64> = store
            .messages(conversation_id)
            .await
            .iter()
            .filter_map(|m| m.sequence)
            .collect();
        assert_eq!(sequences, vec![11, 12, 13]);
    }

    #[tokio::test]
    async fn test_replayed_message_is_discarded() {
        let (store, conversation_id, other) = seeded_store().await;
        let wire = wire_message(conversation_id, other, 5);

        store
            .apply_incoming(&ServerEvent::MessageNew {
                message: wire.clone(),
            })
            .await;
        store
            .apply_incoming(&ServerEvent::MessageNew { message: wire })
            .await;

        assert_eq!(store.messages(conversation_id).await.len(), 1);
        let conversation = store.conversation(conversation_id).await.unwrap();
        assert_eq!(conversation.unread_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_conversation_event_is_dropped() {
        let (store, conversation_id, other) = seeded_store().await;

        store
            .apply_incoming(&ServerEvent::MessageNew {
                message: wire_message(Uuid::new_v4(), other, 1),
            })
            .await;

        assert!(store.messages(conversation_id).await.is_empty());
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_pinned_then_activity() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let store = ConversationStore::new(me);

        let quiet = Uuid::new_v4();
        let busy = Uuid::new_v4();
        let pinned = Uuid::new_v4();
        store
            .load_conversations(vec![
                wire_conversation(quiet, me, other),
                wire_conversation(busy, me, other),
                wire_conversation(pinned, me, other),
            ])
            .await;
        store.set_pinned(pinned, true).await;

        store
            .apply_incoming(&ServerEvent::MessageNew {
                message: wire_message(busy, other, 1),
            })
            .await;

        let ids: Vec<Uuid> = store.list().await.iter().map(|c| c.id).collect();
        assert_eq!(ids[0], pinned);
        assert_eq!(ids[1], busy);
        assert_eq!(ids[2], quiet);
    }

    #[tokio::test]
    async fn test_archived_leaves_list_but_stays_searchable() {
        let (store, conversation_id, other) = seeded_store().await;
        store
            .apply_incoming(&ServerEvent::MessageNew {
                message: wire_message(conversation_id, other, 1),
            })
            .await;

        store.archive(conversation_id).await;
        assert!(store.list().await.is_empty());

        let hits = store.search("message 1").await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, conversation_id);

        let by_name = store.search("jordan").await;
        assert_eq!(by_name.len(), 1);
    }

    #[tokio::test]
    async fn test_moderation_edit_applies_like_any_edit() {
        let (store, conversation_id, other) = seeded_store().await;
        let wire = wire_message(conversation_id, other, 1);
        let message_id = wire.id;
        store
            .apply_incoming(&ServerEvent::MessageNew { message: wire })
            .await;

        store
            .apply_incoming(&ServerEvent::MessageEdited {
                conversation_id,
                message_id,
                content: MessageContent::System {
                    note: "removed by moderator".into(),
                },
                formatting: None,
                edited_at: Utc::now(),
                flagged: true,
            })
            .await;

        let message = store.message(conversation_id, message_id).await.unwrap();
        assert!(message.flagged);
        assert!(message.edited_at.is_some());
        assert!(!message.content.is_plain_text());
    }

    #[tokio::test]
    async fn test_read_receipt_advances_own_messages_monotonically() {
        let (store, conversation_id, other) = seeded_store().await;
        let me = store.current_user();

        let mine = wire_message(conversation_id, me, 4);
        let mine_id = mine.id;
        store
            .apply_incoming(&ServerEvent::MessageNew { message: mine })
            .await;

        store
            .apply_incoming(&ServerEvent::ReceiptRead {
                conversation_id,
                user_id: other,
                sequence: 10,
            })
            .await;
        let message = store.message(conversation_id, mine_id).await.unwrap();
        assert_eq!(message.delivery, DeliveryStatus::Read);

        // A late delivered receipt cannot regress it.
        store
            .apply_incoming(&ServerEvent::ReceiptDelivered {
                conversation_id,
                message_id: mine_id,
                user_id: other,
            })
            .await;
        let message = store.message(conversation_id, mine_id).await.unwrap();
        assert_eq!(message.delivery, DeliveryStatus::Read);
    }

    #[tokio::test]
    async fn test_presence_update_reaches_participants() {
        let (store, conversation_id, other) = seeded_store().await;

        store
            .apply_incoming(&ServerEvent::PresenceUpdate {
                user_id: other,
                status: PresenceStatus::Away,
            })
            .await;

        let conversation = store.conversation(conversation_id).await.unwrap();
        let participant = conversation.participant(other).unwrap();
        assert_eq!(participant.presence, PresenceStatus::Away);
    }

    #[tokio::test]
    async fn test_history_page_merges_below_live_window() {
        let (store, conversation_id, other) = seeded_store().await;
        store
            .apply_incoming(&ServerEvent::MessageNew {
                message: wire_message(conversation_id, other, 20),
            })
            .await;

        // Pages come back descending; the cache ends up ascending.
        store
            .insert_history_page(
                conversation_id,
                vec![
                    wire_message(conversation_id, other, 19),
                    wire_message(conversation_id, other, 18),
                ],
            )
            .await;

        let sequences: Vec<i64> = store
            .messages(conversation_id)
            .await
            .iter()
            .filter_map(|m| m.sequence)
            .collect();
        assert_eq!(sequences, vec![18, 19, 20]);
    }
}
