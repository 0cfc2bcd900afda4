//! The explicitly constructed service instance tying the core together.
//!
//! One `ChatClient` per signed-in user: it owns the connection, the store,
//! the lifecycle manager and the typing coordinator, and runs the dispatcher
//! that fans inbound events out by kind. Consumers receive it by injection;
//! there are no ambient singletons.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::connection::{ChannelEvent, ConnectionManager, Transport};
use crate::error::{AppError, AppResult};
use crate::services::api::{ApiClient, AuthSession, Credentials};
use crate::services::conversation_store::ConversationStore;
use crate::services::message_lifecycle::{MessageLifecycleManager, SendTicket};
use crate::services::typing::TypingCoordinator;
use event_schema::{Attachment, ClientOp, MessageContent, MessageFormatting, ServerEvent};

pub struct ChatClient {
    config: Arc<Config>,
    api: Arc<ApiClient>,
    connection: Arc<ConnectionManager>,
    store: Arc<ConversationStore>,
    lifecycle: Arc<MessageLifecycleManager>,
    typing: Arc<TypingCoordinator>,
    session: AuthSession,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Full init-on-connect: auth handshake, conversation list fetch, then
    /// the persistent channel upgrade.
    pub async fn sign_in(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        credentials: &Credentials,
    ) -> AppResult<Arc<Self>> {
        let api = Arc::new(ApiClient::new(config.api_base_url.clone()));
        let session = api.login(credentials).await?;
        let client = Self::with_session(config, transport, api, session).await;
        client.refresh_conversations().await?;
        client.open_channel().await;
        Ok(client)
    }

    /// Assemble the core around an existing session without touching the
    /// network. The caller opens the channel when ready.
    pub async fn with_session(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        api: Arc<ApiClient>,
        session: AuthSession,
    ) -> Arc<Self> {
        let connection = Arc::new(ConnectionManager::new(Arc::clone(&config), transport));
        let store = ConversationStore::new(session.user_id);
        let lifecycle = MessageLifecycleManager::new(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&connection),
            session.role,
        );
        let typing =
            TypingCoordinator::new(config.typing.clone(), Arc::clone(&connection), session.user_id);

        let client = Arc::new(Self {
            config,
            api,
            connection,
            store,
            lifecycle,
            typing,
            session,
            dispatcher: Mutex::new(None),
        });
        client.spawn_dispatcher().await;
        client
    }

    /// Route inbound events by kind: typing to the coordinator, everything
    /// else through the lifecycle manager into the store.
    async fn spawn_dispatcher(self: &Arc<Self>) {
        let mut events = self.connection.subscribe().await;
        let lifecycle = Arc::clone(&self.lifecycle);
        let typing = Arc::clone(&self.typing);

        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ChannelEvent::Server(server_event) => match server_event {
                        ServerEvent::TypingStart { .. } | ServerEvent::TypingStop { .. } => {
                            typing.apply_event(&server_event).await;
                        }
                        other => lifecycle.apply_event(&other).await,
                    },
                    ChannelEvent::SendFailed { temp_id } => {
                        lifecycle.mark_send_failed(temp_id).await;
                    }
                    ChannelEvent::StateChanged(state) => {
                        tracing::debug!(?state, "channel state observed");
                    }
                }
            }
        });
        *self.dispatcher.lock().await = Some(handle);
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn typing(&self) -> &Arc<TypingCoordinator> {
        &self.typing
    }

    pub async fn open_channel(&self) {
        self.connection.connect(self.session.token.clone()).await;
    }

    /// Teardown-on-logout: stop reconnecting and kill the dispatcher.
    pub async fn logout(&self) {
        self.connection.disconnect().await;
        if let Some(handle) = self.dispatcher.lock().await.take() {
            handle.abort();
        }
        tracing::info!("chat client torn down");
    }

    pub async fn refresh_conversations(&self) -> AppResult<()> {
        let conversations = self.api.fetch_conversations().await?;
        self.store.load_conversations(conversations).await;
        Ok(())
    }

    /// Activate a conversation; emits the read receipt for the highest
    /// sequence seen there.
    pub async fn select_conversation(&self, conversation_id: Uuid) -> AppResult<()> {
        if self.store.conversation(conversation_id).await.is_none() {
            return Err(AppError::NotFound);
        }
        if let Some(sequence) = self.store.select(conversation_id).await {
            self.connection
                .send(ClientOp::ReadReceipt {
                    conversation_id,
                    sequence,
                })
                .await;
        }
        Ok(())
    }

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        content: MessageContent,
        formatting: MessageFormatting,
        attachments: Vec<Attachment>,
        reply_to: Option<Uuid>,
    ) -> AppResult<SendTicket> {
        self.lifecycle
            .send_message(conversation_id, content, formatting, attachments, reply_to)
            .await
    }

    pub async fn retry_send(&self, conversation_id: Uuid, temp_id: Uuid) -> AppResult<SendTicket> {
        self.lifecycle.retry(conversation_id, temp_id).await
    }

    pub async fn cancel_send(&self, temp_id: Uuid) -> AppResult<()> {
        self.lifecycle.cancel(temp_id).await
    }

    pub async fn edit_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        content: MessageContent,
        formatting: MessageFormatting,
    ) -> AppResult<()> {
        self.lifecycle
            .edit_message(conversation_id, message_id, content, formatting)
            .await
    }

    pub async fn delete_message(&self, conversation_id: Uuid, message_id: Uuid) -> AppResult<()> {
        self.lifecycle.delete_message(conversation_id, message_id).await
    }

    pub async fn toggle_reaction(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> AppResult<bool> {
        self.lifecycle
            .toggle_reaction(conversation_id, message_id, emoji)
            .await
    }

    pub async fn start_typing(&self, conversation_id: Uuid) {
        self.typing.start_typing(conversation_id).await;
    }

    pub async fn stop_typing(&self, conversation_id: Uuid) {
        self.typing.stop_typing(conversation_id).await;
    }

    /// Newest history page for a conversation being opened.
    pub async fn load_recent_history(&self, conversation_id: Uuid) -> AppResult<()> {
        let page = self
            .api
            .fetch_history(conversation_id, None, self.config.history_page_size)
            .await?;
        self.store.insert_history_page(conversation_id, page).await;
        Ok(())
    }

    /// Next page upward from the oldest cached sequence.
    pub async fn load_older_history(&self, conversation_id: Uuid) -> AppResult<()> {
        let oldest = self
            .store
            .messages(conversation_id)
            .await
            .iter()
            .filter_map(|m| m.sequence)
            .min();
        let page = self
            .api
            .fetch_history(conversation_id, oldest, self.config.history_page_size)
            .await?;
        self.store.insert_history_page(conversation_id, page).await;
        Ok(())
    }

    /// Conflict recovery: pull the authoritative copy of a message the
    /// caller just failed to mutate.
    pub async fn refetch_message(&self, conversation_id: Uuid, message_id: Uuid) -> AppResult<()> {
        let wire = self.api.fetch_message(conversation_id, message_id).await?;
        self.store.replace_authoritative(wire).await;
        Ok(())
    }
}
