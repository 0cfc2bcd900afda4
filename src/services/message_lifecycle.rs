//! Per-message state transitions: optimistic send, ack correlation, edit,
//! delete, retry, receipts.
//!
//! Callers get the optimistic state back immediately; the ack or failure
//! arrives later through the returned ticket. All store mutations funnel
//! through `ConversationStore` methods.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::{AppError, AppResult};
use crate::models::message::{DeliveryStatus, Message};
use crate::services::conversation_store::ConversationStore;
use event_schema::{
    Attachment, ClientOp, MessageContent, MessageFormatting, ParticipantRole, ServerEvent,
};

/// Handed back by `send_message`: the optimistic entry is already in the
/// store; `ack` resolves once the server answers or the bound expires.
#[derive(Debug)]
pub struct SendTicket {
    pub temp_id: Uuid,
    pub ack: oneshot::Receiver<AppResult<Uuid>>,
}

struct PendingSend {
    conversation_id: Uuid,
    resolve: oneshot::Sender<AppResult<Uuid>>,
}

pub struct MessageLifecycleManager {
    config: Arc<Config>,
    store: Arc<ConversationStore>,
    connection: Arc<ConnectionManager>,
    sender_role: ParticipantRole,
    pending: Arc<RwLock<HashMap<Uuid, PendingSend>>>,
}

impl MessageLifecycleManager {
    pub fn new(
        config: Arc<Config>,
        store: Arc<ConversationStore>,
        connection: Arc<ConnectionManager>,
        sender_role: ParticipantRole,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            connection,
            sender_role,
            pending: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn validate_outbound(&self, content: &MessageContent, attachments: &[Attachment]) -> AppResult<()> {
        if content.is_empty() && attachments.is_empty() {
            return Err(AppError::Validation(
                "message needs content or an attachment".into(),
            ));
        }
        if let MessageContent::Text { body } = content {
            if body.chars().count() > self.config.max_content_chars {
                return Err(AppError::Validation("content too long".into()));
            }
        }
        Ok(())
    }

    /// Register the ack correlation and arm the timeout for one submission.
    async fn arm_pending(&self, conversation_id: Uuid, temp_id: Uuid) -> SendTicket {
        let (resolve, ack) = oneshot::channel();
        self.pending.write().await.insert(
            temp_id,
            PendingSend {
                conversation_id,
                resolve,
            },
        );

        let pending = Arc::clone(&self.pending);
        let store = Arc::clone(&self.store);
        let ack_timeout = self.config.ack_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(ack_timeout).await;
            if let Some(entry) = pending.write().await.remove(&temp_id) {
                tracing::warn!(%temp_id, "no ack within bound, marking send failed");
                store
                    .set_delivery(entry.conversation_id, temp_id, DeliveryStatus::Failed)
                    .await;
                let _ = entry.resolve.send(Err(AppError::Timeout));
            }
        });

        SendTicket { temp_id, ack }
    }

    /// Validate, append the optimistic entry, submit, and hand back the
    /// ticket. Returns immediately; the channel may still be reconnecting,
    /// in which case the op waits in the outbound queue.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        content: MessageContent,
        formatting: MessageFormatting,
        attachments: Vec<Attachment>,
        reply_to: Option<Uuid>,
    ) -> AppResult<SendTicket> {
        self.validate_outbound(&content, &attachments)?;
        if self.store.conversation(conversation_id).await.is_none() {
            return Err(AppError::NotFound);
        }

        let temp_id = Uuid::new_v4();
        let message = Message::optimistic(
            temp_id,
            conversation_id,
            self.store.current_user(),
            self.sender_role,
            content.clone(),
            formatting.clone(),
            attachments.clone(),
            reply_to,
        );
        self.store.append_optimistic(message).await;

        let ticket = self.arm_pending(conversation_id, temp_id).await;
        self.connection
            .send(ClientOp::SendMessage {
                conversation_id,
                temp_id,
                content,
                formatting,
                attachments,
                reply_to,
            })
            .await;

        Ok(ticket)
    }

    /// Re-submit a failed send under its original temp id.
    pub async fn retry(&self, conversation_id: Uuid, temp_id: Uuid) -> AppResult<SendTicket> {
        let message = self
            .store
            .message(conversation_id, temp_id)
            .await
            .ok_or(AppError::NotFound)?;
        if !message.id.is_local() || message.delivery != DeliveryStatus::Failed {
            return Err(AppError::Conflict("only failed sends can be retried".into()));
        }

        self.store
            .set_delivery(conversation_id, temp_id, DeliveryStatus::Sending)
            .await;

        let ticket = self.arm_pending(conversation_id, temp_id).await;
        self.connection
            .send(ClientOp::SendMessage {
                conversation_id,
                temp_id,
                content: message.content,
                formatting: message.formatting,
                attachments: message.attachments,
                reply_to: message.reply_to,
            })
            .await;

        Ok(ticket)
    }

    /// Cancel a pending send. Only possible before its ack arrives; the
    /// optimistic entry stays in place as failed, preserving ordering.
    pub async fn cancel(&self, temp_id: Uuid) -> AppResult<()> {
        match self.pending.write().await.remove(&temp_id) {
            Some(entry) => {
                self.store
                    .set_delivery(entry.conversation_id, temp_id, DeliveryStatus::Failed)
                    .await;
                // Dropping the resolver tells the ticket holder nothing more
                // is coming.
                drop(entry.resolve);
                Ok(())
            }
            None => Err(AppError::Conflict(
                "send already acknowledged or failed".into(),
            )),
        }
    }

    /// Edit one of the caller's own plain-text messages.
    pub async fn edit_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        content: MessageContent,
        formatting: MessageFormatting,
    ) -> AppResult<()> {
        let message = self
            .store
            .message(conversation_id, message_id)
            .await
            .ok_or(AppError::NotFound)?;

        if message.sender_id != self.store.current_user() {
            return Err(AppError::Authorization(
                "only the sender may edit a message".into(),
            ));
        }
        if !message.content.is_plain_text() {
            return Err(AppError::Authorization(
                "only plain text messages can be edited".into(),
            ));
        }
        if message.tombstoned || message.flagged {
            // Concurrently moderated or deleted; refetch authoritative state
            // instead of overwriting.
            return Err(AppError::Conflict(
                "message was moderated or removed".into(),
            ));
        }
        if message.id.is_local() {
            return Err(AppError::Conflict("message not yet acknowledged".into()));
        }
        if content.is_empty() || !content.is_plain_text() {
            return Err(AppError::Validation("edited content must be text".into()));
        }

        self.store
            .apply_local_edit(
                conversation_id,
                message_id,
                content.clone(),
                formatting.clone(),
                Utc::now(),
            )
            .await;
        self.connection
            .send(ClientOp::EditMessage {
                conversation_id,
                message_id,
                content,
                formatting,
            })
            .await;
        Ok(())
    }

    /// Tombstone a message. Allowed for its sender, or for a moderator.
    pub async fn delete_message(&self, conversation_id: Uuid, message_id: Uuid) -> AppResult<()> {
        let message = self
            .store
            .message(conversation_id, message_id)
            .await
            .ok_or(AppError::NotFound)?;

        let own = message.sender_id == self.store.current_user();
        if !own && !self.sender_role.can_moderate() {
            return Err(AppError::Authorization(
                "only the sender or a moderator may delete a message".into(),
            ));
        }
        if message.tombstoned {
            return Err(AppError::Conflict("message already removed".into()));
        }
        if message.id.is_local() {
            return Err(AppError::Conflict("message not yet acknowledged".into()));
        }

        self.store
            .tombstone_message(conversation_id, message_id)
            .await;
        self.connection
            .send(ClientOp::DeleteMessage {
                conversation_id,
                message_id,
            })
            .await;
        Ok(())
    }

    /// Toggle the current user's reaction and mirror the result to the
    /// server. Returns whether the reaction is now active.
    pub async fn toggle_reaction(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> AppResult<bool> {
        if emoji.is_empty() || emoji.len() > 20 {
            return Err(AppError::Validation("invalid emoji".into()));
        }

        let added = self
            .store
            .toggle_reaction(conversation_id, message_id, emoji)
            .await
            .ok_or(AppError::NotFound)?;

        let op = if added {
            ClientOp::AddReaction {
                conversation_id,
                message_id,
                emoji: emoji.to_string(),
            }
        } else {
            ClientOp::RemoveReaction {
                conversation_id,
                message_id,
                emoji: emoji.to_string(),
            }
        };
        self.connection.send(op).await;
        Ok(added)
    }

    /// A queued send was failed locally by the connection manager (it went
    /// stale while the channel was down).
    pub async fn mark_send_failed(&self, temp_id: Uuid) {
        if let Some(entry) = self.pending.write().await.remove(&temp_id) {
            self.store
                .set_delivery(entry.conversation_id, temp_id, DeliveryStatus::Failed)
                .await;
            let _ = entry
                .resolve
                .send(Err(AppError::Transport("send went stale in queue".into())));
        }
    }

    /// Fold one server event. Acks resolve their correlation here; anything
    /// else is the store's business.
    pub async fn apply_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::MessageAck {
                conversation_id,
                temp_id,
                message_id,
                sequence,
                created_at,
            } => {
                let entry = self.pending.write().await.remove(temp_id);
                match entry {
                    Some(entry) => {
                        let confirmed = self
                            .store
                            .confirm_ack(
                                *conversation_id,
                                *temp_id,
                                *message_id,
                                *sequence,
                                *created_at,
                            )
                            .await;
                        if !confirmed {
                            tracing::warn!(%temp_id, "ack matched no optimistic entry");
                        }
                        let _ = entry.resolve.send(Ok(*message_id));
                    }
                    // Exactly-once local effect: a replayed ack after
                    // reconnect finds no correlation and is discarded.
                    None => tracing::debug!(%temp_id, "duplicate ack discarded"),
                }
            }
            other => self.store.apply_incoming(other).await,
        }
    }
}
