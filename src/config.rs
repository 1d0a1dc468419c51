//! Client configuration from defaults or environment variables.

use std::time::Duration;

use chathub_shared::HubName;

use crate::hub::ReconnectConfig;

/// Where the credential pair lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenPersistence {
    /// File-backed; survives restarts.
    #[default]
    Local,
    /// In-memory; gone when the process exits.
    Session,
}

impl TokenPersistence {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Some(TokenPersistence::Local),
            "session" => Some(TokenPersistence::Session),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, e.g. `https://chat.example.com/api`
    pub api_base_url: String,
    /// Base URL the hub paths are appended to
    pub hub_base_url: String,
    /// Hubs created by `initialize`
    pub hubs: Vec<HubName>,
    pub reconnect: ReconnectConfig,
    /// Failed queue deliveries before a buffered message is dropped
    pub max_queue_retries: u32,
    /// Pause before a connected hub retries its queue after a failed send
    pub queue_retry_delay: Duration,
    /// Drain a hub's outbound queue whenever it (re)connects
    pub drain_queue_on_connect: bool,
    pub token_persistence: TokenPersistence,
    /// Directory name under the platform config dir for local persistence
    pub app_name: String,
    pub keep_alive_interval: Duration,
    pub server_timeout: Duration,
    /// `None` waits for a completion indefinitely
    pub invoke_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            hub_base_url: "http://localhost:5000/hubs".to_string(),
            hubs: HubName::ALL.to_vec(),
            reconnect: ReconnectConfig::default(),
            max_queue_retries: 5,
            queue_retry_delay: Duration::from_millis(250),
            drain_queue_on_connect: true,
            token_persistence: TokenPersistence::default(),
            app_name: "chathub".to_string(),
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            invoke_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `CHATHUB_API_BASE_URL`: REST base URL (default: "http://localhost:5000/api")
    /// - `CHATHUB_HUB_BASE_URL`: hub base URL (default: "http://localhost:5000/hubs")
    /// - `CHATHUB_TOKEN_PERSISTENCE`: "local" | "session" (default: "local")
    /// - `CHATHUB_MAX_QUEUE_RETRIES`: default 5
    /// - `CHATHUB_QUEUE_RETRY_DELAY_MS`: default 250
    /// - `CHATHUB_DRAIN_ON_CONNECT`: "true" | "false" (default: "true")
    /// - `CHATHUB_INVOKE_TIMEOUT_MS`: unset means no timeout
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("CHATHUB_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Some(url) = lookup("CHATHUB_HUB_BASE_URL") {
            config.hub_base_url = url;
        }
        if let Some(mode) = lookup("CHATHUB_TOKEN_PERSISTENCE") {
            match TokenPersistence::parse(&mode) {
                Some(persistence) => config.token_persistence = persistence,
                None => tracing::warn!(%mode, "unknown CHATHUB_TOKEN_PERSISTENCE, using local"),
            }
        }
        if let Some(retries) = lookup("CHATHUB_MAX_QUEUE_RETRIES").and_then(|v| v.parse().ok()) {
            config.max_queue_retries = retries;
        }
        if let Some(delay) = lookup("CHATHUB_QUEUE_RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
            config.queue_retry_delay = Duration::from_millis(delay);
        }
        if let Some(drain) = lookup("CHATHUB_DRAIN_ON_CONNECT").and_then(|v| v.parse().ok()) {
            config.drain_queue_on_connect = drain;
        }
        config.invoke_timeout = lookup("CHATHUB_INVOKE_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis);

        config
    }

    /// `{api_base_url}/{path}`
    pub fn api_url(&self, path: &str) -> String {
        join_url(&self.api_base_url, path)
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_cover_all_hubs_and_five_retries() {
        let config = ClientConfig::default();
        assert_eq!(config.hubs, HubName::ALL.to_vec());
        assert_eq!(config.max_queue_retries, 5);
        assert!(config.drain_queue_on_connect);
        assert_eq!(config.invoke_timeout, None);
        assert_eq!(config.token_persistence, TokenPersistence::Local);
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("CHATHUB_API_BASE_URL", "https://chat.example.com/api/"),
            ("CHATHUB_TOKEN_PERSISTENCE", "Session"),
            ("CHATHUB_MAX_QUEUE_RETRIES", "3"),
            ("CHATHUB_DRAIN_ON_CONNECT", "false"),
            ("CHATHUB_QUEUE_RETRY_DELAY_MS", "40"),
            ("CHATHUB_INVOKE_TIMEOUT_MS", "2500"),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.token_persistence, TokenPersistence::Session);
        assert_eq!(config.max_queue_retries, 3);
        assert!(!config.drain_queue_on_connect);
        assert_eq!(config.queue_retry_delay, Duration::from_millis(40));
        assert_eq!(config.invoke_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(
            config.api_url("/account/refresh-token"),
            "https://chat.example.com/api/account/refresh-token"
        );
    }

    #[test]
    fn unknown_persistence_keeps_local() {
        let config = ClientConfig::from_lookup(|k| {
            (k == "CHATHUB_TOKEN_PERSISTENCE").then(|| "cookie".to_string())
        });
        assert_eq!(config.token_persistence, TokenPersistence::Local);
    }
}
