//! Request/response side channel: auth handshake, conversation list, and
//! cursor-paginated message history. Everything realtime rides the
//! persistent channel instead.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use event_schema::{ParticipantRole, WireConversation, WireMessage};

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Result of the bearer handshake, presented before the channel upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user_id: Uuid,
    pub display_name: String,
    pub role: ParticipantRole,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    fn classify(status: StatusCode) -> AppError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                AppError::Authorization(format!("http {status}"))
            }
            StatusCode::NOT_FOUND => AppError::NotFound,
            StatusCode::CONFLICT => AppError::Conflict(format!("http {status}")),
            StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => {
                AppError::Validation(format!("http {status}"))
            }
            other => AppError::Transport(format!("http {other}")),
        }
    }

    async fn bearer(&self) -> AppResult<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::Authorization("not signed in".into()))
    }

    /// Exchange credentials for the bearer session used by both channels.
    pub async fn login(&self, credentials: &Credentials) -> AppResult<AuthSession> {
        let response = self
            .http
            .post(format!("{}/auth/session", self.base_url))
            .json(credentials)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify(response.status()));
        }

        let session: AuthSession = response.json().await?;
        *self.token.write().await = Some(session.token.clone());
        tracing::info!(user_id = %session.user_id, "auth handshake complete");
        Ok(session)
    }

    pub async fn fetch_conversations(&self) -> AppResult<Vec<WireConversation>> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(format!("{}/conversations", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify(response.status()));
        }
        Ok(response.json().await?)
    }

    /// One history page, descending by sequence from `before_sequence` (or
    /// from the newest message when absent).
    pub async fn fetch_history(
        &self,
        conversation_id: Uuid,
        before_sequence: Option<i64>,
        limit: u32,
    ) -> AppResult<Vec<WireMessage>> {
        let token = self.bearer().await?;
        let mut request = self
            .http
            .get(format!(
                "{}/conversations/{conversation_id}/messages",
                self.base_url
            ))
            .bearer_auth(token)
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = before_sequence {
            request = request.query(&[("before_seq", cursor.to_string())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::classify(response.status()));
        }
        Ok(response.json().await?)
    }

    /// Authoritative single-message state, for conflict recovery after a
    /// concurrent moderation or deletion.
    pub async fn fetch_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<WireMessage> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(format!(
                "{}/conversations/{conversation_id}/messages/{message_id}",
                self.base_url
            ))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify(response.status()));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ApiClient::classify(StatusCode::UNAUTHORIZED),
            AppError::Authorization(_)
        ));
        assert!(matches!(
            ApiClient::classify(StatusCode::NOT_FOUND),
            AppError::NotFound
        ));
        assert!(matches!(
            ApiClient::classify(StatusCode::CONFLICT),
            AppError::Conflict(_)
        ));
        assert!(matches!(
            ApiClient::classify(StatusCode::BAD_REQUEST),
            AppError::Validation(_)
        ));
        assert!(matches!(
            ApiClient::classify(StatusCode::BAD_GATEWAY),
            AppError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_calls_require_session() {
        let api = ApiClient::new("http://localhost:9");
        let err = api.fetch_conversations().await.unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
    }

    #[test]
    fn test_base_url_normalization() {
        let api = ApiClient::new("http://localhost:3000/");
        assert_eq!(api.base_url, "http://localhost:3000");
    }
}
