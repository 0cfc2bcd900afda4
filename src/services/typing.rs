//! Typing presence: debounced local emission, expiring remote indicators.
//!
//! A lost typing.stop can never wedge an indicator on screen; every remote
//! entry carries an expiry and vanishes when it elapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::TypingConfig;
use crate::connection::ConnectionManager;
use event_schema::{ClientOp, ServerEvent};

/// One remote participant currently typing in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingIndicator {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub expires_at: Instant,
}

struct LocalTyping {
    last_emit: Instant,
    idle_task: JoinHandle<()>,
}

struct RemoteEntry {
    display_name: String,
    expires_at: Instant,
}

pub struct TypingCoordinator {
    config: TypingConfig,
    connection: Arc<ConnectionManager>,
    current_user: Uuid,
    local: Arc<Mutex<HashMap<Uuid, LocalTyping>>>,
    remote: RwLock<HashMap<(Uuid, Uuid), RemoteEntry>>,
}

impl TypingCoordinator {
    pub fn new(
        config: TypingConfig,
        connection: Arc<ConnectionManager>,
        current_user: Uuid,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            connection,
            current_user,
            local: Arc::new(Mutex::new(HashMap::new())),
            remote: RwLock::new(HashMap::new()),
        })
    }

    /// Called on every local keystroke. Emits typing.start at most once per
    /// debounce window and (re)arms the idle timer that sends the implicit
    /// stop when the caller goes quiet without calling `stop_typing`.
    pub async fn start_typing(&self, conversation_id: Uuid) {
        let mut local = self.local.lock().await;
        let now = Instant::now();

        let last_emit = match local.remove(&conversation_id) {
            Some(previous) => {
                previous.idle_task.abort();
                Some(previous.last_emit)
            }
            None => None,
        };

        let emit = last_emit
            .map(|at| now.duration_since(at) >= self.config.debounce)
            .unwrap_or(true);
        if emit {
            self.connection
                .send(ClientOp::TypingStart { conversation_id })
                .await;
        }

        let idle_task = {
            let connection = Arc::clone(&self.connection);
            let local = Arc::clone(&self.local);
            let idle_timeout = self.config.idle_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(idle_timeout).await;
                connection
                    .send(ClientOp::TypingStop { conversation_id })
                    .await;
                local.lock().await.remove(&conversation_id);
            })
        };

        local.insert(
            conversation_id,
            LocalTyping {
                last_emit: if emit {
                    now
                } else {
                    last_emit.unwrap_or(now)
                },
                idle_task,
            },
        );
    }

    /// Explicit stop; disarms the idle timer. A stop without a preceding
    /// start is a no-op.
    pub async fn stop_typing(&self, conversation_id: Uuid) {
        let mut local = self.local.lock().await;
        if let Some(entry) = local.remove(&conversation_id) {
            entry.idle_task.abort();
            self.connection
                .send(ClientOp::TypingStop { conversation_id })
                .await;
        }
    }

    /// Fold remote typing events. Each start sets or refreshes the expiry;
    /// our own echoes are ignored.
    pub async fn apply_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::TypingStart {
                conversation_id,
                user_id,
                display_name,
            } => {
                if *user_id == self.current_user {
                    return;
                }
                self.remote.write().await.insert(
                    (*conversation_id, *user_id),
                    RemoteEntry {
                        display_name: display_name.clone(),
                        expires_at: Instant::now() + self.config.indicator_ttl,
                    },
                );
            }
            ServerEvent::TypingStop {
                conversation_id,
                user_id,
            } => {
                self.remote
                    .write()
                    .await
                    .remove(&(*conversation_id, *user_id));
            }
            _ => {}
        }
    }

    /// Live indicators for a conversation. Expired entries are pruned on
    /// every read, so a lost stop event cannot leave one stuck.
    pub async fn active(&self, conversation_id: Uuid) -> Vec<TypingIndicator> {
        let now = Instant::now();
        let mut remote = self.remote.write().await;
        remote.retain(|_, entry| entry.expires_at > now);

        remote
            .iter()
            .filter(|((conversation, _), _)| *conversation == conversation_id)
            .map(|((conversation, user), entry)| TypingIndicator {
                conversation_id: *conversation,
                user_id: *user,
                display_name: entry.display_name.clone(),
                expires_at: entry.expires_at,
            })
            .collect()
    }
}
