//! One authenticated session: credentials, REST client and hubs together.

use std::sync::Arc;

use chathub_shared::LoginData;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::api::{ApiClient, AuthEvent};
use crate::config::{ClientConfig, TokenPersistence};
use crate::error::SessionError;
use crate::hub::{HubClient, HubTransport, WebSocketTransport};
use crate::storage::{FileStorage, MemoryStorage, Storage};
use crate::token_store::TokenStore;

/// Owns the [`TokenStore`], [`ApiClient`] and [`HubClient`] of a session.
///
/// Token rotations made by the refresh interceptor are forwarded to the hubs
/// so their next (re)connect uses the new token. A failed refresh stops all
/// hubs and discards their queued sends; observe [`session_events`](Self::session_events) to send the user
/// back to login.
pub struct Session {
    tokens: Arc<TokenStore>,
    api: ApiClient,
    hubs: Arc<HubClient>,
    relay: JoinHandle<()>,
}

impl Session {
    /// Session over the WebSocket hub transport and the configured storage.
    /// Must be called within a tokio runtime.
    pub fn new(config: &ClientConfig) -> Result<Self, SessionError> {
        Self::with_parts(
            config,
            storage_for(config),
            Arc::new(WebSocketTransport::from_config(config)),
        )
    }

    pub fn with_parts(
        config: &ClientConfig,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn HubTransport>,
    ) -> Result<Self, SessionError> {
        let tokens = Arc::new(TokenStore::new(storage));
        let api = ApiClient::new(config.api_base_url.clone(), tokens.clone());
        let hubs = Arc::new(HubClient::new(config, transport)?);
        let relay = tokio::spawn(relay_auth_events(
            api.refresher().subscribe(),
            hubs.clone(),
        ));
        Ok(Self {
            tokens,
            api,
            hubs,
            relay,
        })
    }

    /// Exchange credentials for a token pair, then bring the hubs up.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginData, SessionError> {
        let data = self.api.login(email, password).await?;
        self.tokens.set(&data.access_token, &data.refresh_token);
        self.hubs.initialize(&data.access_token)?;
        self.hubs.start_all().await;
        tracing::info!(full_name = %data.full_name, "logged in");
        Ok(data)
    }

    /// Bring the hubs up with a persisted token. Returns `false` if there is
    /// nothing to resume.
    pub async fn resume(&self) -> Result<bool, SessionError> {
        let Some(access_token) = self.tokens.access_token() else {
            return Ok(false);
        };
        self.hubs.initialize(&access_token)?;
        self.hubs.start_all().await;
        tracing::info!("resumed persisted session");
        Ok(true)
    }

    /// Best-effort server logout, then stop the hubs and forget the pair.
    pub async fn logout(&self) {
        if self.tokens.is_authenticated() {
            if let Err(e) = self.api.logout().await {
                tracing::warn!(error = %e, "server logout failed");
            }
        }
        self.hubs.stop_all().await;
        self.hubs.discard_queued();
        self.tokens.clear();
        tracing::info!("logged out");
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated()
    }

    pub fn session_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.api.refresher().subscribe()
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn hubs(&self) -> &Arc<HubClient> {
        &self.hubs
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tokens", &self.tokens)
            .field("hubs", &self.hubs)
            .finish()
    }
}

fn storage_for(config: &ClientConfig) -> Arc<dyn Storage> {
    match config.token_persistence {
        TokenPersistence::Local => match FileStorage::for_app(&config.app_name) {
            Some(storage) => Arc::new(storage),
            None => {
                tracing::warn!("no config directory available, tokens will not persist");
                Arc::new(MemoryStorage::new())
            }
        },
        TokenPersistence::Session => Arc::new(MemoryStorage::new()),
    }
}

async fn relay_auth_events(mut events: broadcast::Receiver<AuthEvent>, hubs: Arc<HubClient>) {
    loop {
        match events.recv().await {
            Ok(AuthEvent::TokensRefreshed { access_token }) => {
                tracing::debug!("forwarding rotated token to hubs");
                hubs.set_credential(Some(access_token));
            }
            Ok(AuthEvent::LoginRequired) => {
                tracing::warn!("credential refresh failed, stopping hubs");
                hubs.stop_all().await;
                hubs.discard_queued();
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "missed auth events");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::testing::{wait_for_state, MockTransport};
    use crate::hub::ConnectionState;
    use chathub_shared::HubName;
    use std::time::Duration;

    fn session(transport: &MockTransport) -> Session {
        let config = ClientConfig {
            reconnect: MockTransport::fast_reconnect(),
            queue_retry_delay: Duration::from_secs(60),
            // Nothing listens here
            api_base_url: "http://127.0.0.1:9/api".to_string(),
            ..ClientConfig::default()
        };
        Session::with_parts(
            &config,
            Arc::new(MemoryStorage::new()),
            Arc::new(transport.clone()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn resume_without_tokens_does_nothing() {
        let transport = MockTransport::new();
        let session = session(&transport);
        assert!(!session.resume().await.unwrap());
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn resume_starts_hubs_with_the_stored_token() {
        let transport = MockTransport::new();
        let session = session(&transport);
        session.tokens().set("stored-access", "stored-refresh");

        assert!(session.resume().await.unwrap());
        assert!(session.hubs().state(HubName::Chat).is_connected());
        assert!(transport
            .tokens_seen()
            .iter()
            .all(|t| t.as_deref() == Some("stored-access")));
    }

    #[tokio::test]
    async fn logout_clears_tokens_and_stops_hubs_even_if_server_is_down() {
        let transport = MockTransport::new();
        let session = session(&transport);
        session.tokens().set("a", "r");
        session.resume().await.unwrap();
        session.hubs().send_message("c1", "x").await.unwrap();

        session.logout().await;
        assert!(!session.is_authenticated());
        assert!(!session.hubs().state(HubName::Chat).is_connected());
        assert_eq!(session.hubs().registry().credential(), None);
        assert!(session.hubs().queued(HubName::Chat).is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_stops_the_hubs_and_drops_queued_sends() {
        let transport = MockTransport::new();
        let session = session(&transport);
        session.tokens().set("a", "r");
        session.resume().await.unwrap();
        let mut events = session.session_events();

        transport.fail_next_invocations(1);
        session.hubs().send_message("c1", "stale").await.unwrap();
        assert_eq!(session.hubs().queued(HubName::Chat).len(), 1);

        // Without a refresh token the exchange fails before any I/O
        session.tokens().clear();
        let _ = session.api().refresher().refresh("a").await;
        assert_eq!(events.recv().await.unwrap(), AuthEvent::LoginRequired);

        let chat = session.hubs().registry().channel(HubName::Chat).unwrap();
        wait_for_state(&chat, |s| *s == ConnectionState::Disconnected).await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while !session.hubs().queued(HubName::Chat).is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queued send was not discarded");
    }
}
