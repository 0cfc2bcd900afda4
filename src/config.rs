use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Timing knobs for the typing indicator coordinator.
#[derive(Debug, Clone)]
pub struct TypingConfig {
    /// Minimum interval between outbound typing.start emissions.
    pub debounce: Duration,
    /// Local idle window after which an implicit typing.stop is sent.
    pub idle_timeout: Duration,
    /// How long a remote indicator lives without a refresh.
    pub indicator_ttl: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            idle_timeout: Duration::from_millis(1000),
            indicator_ttl: Duration::from_millis(4000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket endpoint for the persistent channel.
    pub ws_url: String,
    /// Base URL for the request/response side channel.
    pub api_base_url: String,
    /// How long a submitted send may wait for its ack before it is failed.
    pub ack_timeout: Duration,
    /// Queued outbound operations older than this are failed locally on
    /// reconnect instead of being replayed.
    pub queue_staleness: Duration,
    /// Reconnect backoff base delay.
    pub backoff_base: Duration,
    /// Reconnect backoff ceiling.
    pub backoff_cap: Duration,
    pub typing: TypingConfig,
    /// Page size for cursor-paginated history fetches.
    pub history_page_size: u32,
    /// Upper bound on outbound message body length, in characters.
    pub max_content_chars: usize,
}

impl Config {
    fn env_ms(key: &str, default_ms: u64) -> Duration {
        let ms = env::var(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default_ms);
        Duration::from_millis(ms)
    }

    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();

        let ws_url = env::var("CHAT_WS_URL")
            .map_err(|_| crate::error::AppError::Config("CHAT_WS_URL missing".into()))?;
        let api_base_url = env::var("CHAT_API_URL")
            .map_err(|_| crate::error::AppError::Config("CHAT_API_URL missing".into()))?;

        let history_page_size: u32 = env::var("CHAT_HISTORY_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50);
        let max_content_chars = env::var("CHAT_MAX_CONTENT_CHARS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8000);

        Ok(Self {
            ws_url,
            api_base_url,
            ack_timeout: Self::env_ms("CHAT_ACK_TIMEOUT_MS", 15_000),
            queue_staleness: Self::env_ms("CHAT_QUEUE_STALENESS_MS", 60_000),
            backoff_base: Self::env_ms("CHAT_BACKOFF_BASE_MS", 500),
            backoff_cap: Self::env_ms("CHAT_BACKOFF_CAP_MS", 30_000),
            typing: TypingConfig {
                debounce: Self::env_ms("CHAT_TYPING_DEBOUNCE_MS", 1000),
                idle_timeout: Self::env_ms("CHAT_TYPING_IDLE_MS", 1000),
                indicator_ttl: Self::env_ms("CHAT_TYPING_TTL_MS", 4000),
            },
            // History pages are bounded server-side as well; cap defensively.
            history_page_size: history_page_size.min(200),
            max_content_chars,
        })
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:3000/ws".into(),
            api_base_url: "http://localhost:3000".into(),
            ack_timeout: Duration::from_secs(15),
            queue_staleness: Duration::from_secs(60),
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            typing: TypingConfig::default(),
            history_page_size: 50,
            max_content_chars: 8000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typing_defaults() {
        let typing = TypingConfig::default();
        assert_eq!(typing.debounce, Duration::from_millis(1000));
        assert_eq!(typing.idle_timeout, Duration::from_millis(1000));
        assert_eq!(typing.indicator_ttl, Duration::from_millis(4000));
    }

    #[test]
    fn test_default_config_bounds() {
        let config = Config::default();
        assert_eq!(config.ack_timeout, Duration::from_secs(15));
        assert_eq!(config.backoff_base, Duration::from_millis(500));
        assert_eq!(config.backoff_cap, Duration::from_secs(30));
        assert!(config.history_page_size <= 200);
    }
}
