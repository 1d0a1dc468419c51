//! Single-flight credential refresh.

use std::sync::{Arc, Mutex};

use chathub_shared::{ApiError, ApiResponse, RefreshTokenRequest, TokenPair};
use reqwest::Client;
use tokio::sync::{broadcast, oneshot};

use crate::token_store::TokenStore;

/// Path of the refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "account/refresh-token";

/// Outcome notifications for whoever owns the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The pair was rotated; hubs should use this token from now on
    TokensRefreshed { access_token: String },
    /// Refresh failed and the stored pair was cleared
    LoginRequired,
}

type Waiter = oneshot::Sender<Result<String, ApiError>>;

enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

enum Role {
    Leader,
    Follower(oneshot::Receiver<Result<String, ApiError>>),
}

/// Exchanges the refresh token for a new pair. At most one exchange is in
/// flight; callers arriving meanwhile wait for its outcome.
pub struct CredentialRefresher {
    http: Client,
    refresh_url: String,
    tokens: Arc<TokenStore>,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<AuthEvent>,
}

impl CredentialRefresher {
    pub fn new(http: Client, refresh_url: impl Into<String>, tokens: Arc<TokenStore>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            http,
            refresh_url: refresh_url.into(),
            tokens,
            state: Mutex::new(RefreshState::Idle),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            RefreshState::Refreshing { .. }
        )
    }

    /// Get a usable access token after `rejected` drew a 401.
    ///
    /// If the store already holds a different token, an earlier refresh has
    /// rotated it and that token is returned without another exchange.
    pub async fn refresh(&self, rejected: &str) -> Result<String, ApiError> {
        let role = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Role::Follower(rx)
                }
                RefreshState::Idle => match self.tokens.access_token() {
                    Some(current) if current != rejected => return Ok(current),
                    _ => {
                        *state = RefreshState::Refreshing {
                            waiters: Vec::new(),
                        };
                        Role::Leader
                    }
                },
            }
        };

        match role {
            Role::Follower(outcome) => {
                tracing::debug!("waiting for in-flight token refresh");
                outcome
                    .await
                    .unwrap_or_else(|_| Err(ApiError::Network("token refresh abandoned".into())))
            }
            Role::Leader => {
                let mut flight = Flight {
                    refresher: self,
                    settled: false,
                };
                let outcome = self.exchange().await;
                match &outcome {
                    Ok(pair) => {
                        self.tokens.set_pair(pair);
                        tracing::info!("access token refreshed");
                    }
                    Err(e) => {
                        self.tokens.clear();
                        tracing::warn!(error = %e, "token refresh failed, login required");
                    }
                }
                let outcome = outcome.map(|pair| pair.access_token);
                flight.settle(outcome.clone());

                let event = match &outcome {
                    Ok(access_token) => AuthEvent::TokensRefreshed {
                        access_token: access_token.clone(),
                    },
                    Err(_) => AuthEvent::LoginRequired,
                };
                let _ = self.events.send(event);
                outcome
            }
        }
    }

    async fn exchange(&self) -> Result<TokenPair, ApiError> {
        let refresh_token = self
            .tokens
            .refresh_token()
            .ok_or(ApiError::NotAuthenticated)?;

        let resp = self
            .http
            .post(&self.refresh_url)
            .json(&RefreshTokenRequest { refresh_token })
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        let envelope: ApiResponse<TokenPair> =
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))?;
        envelope
            .data
            .ok_or_else(|| ApiError::Deserialize("refresh response without data".to_string()))
    }
}

/// Resolves every waiter exactly once, also when the leader is cancelled.
struct Flight<'a> {
    refresher: &'a CredentialRefresher,
    settled: bool,
}

impl Flight<'_> {
    fn settle(&mut self, outcome: Result<String, ApiError>) {
        self.settled = true;
        let previous = std::mem::replace(
            &mut *self
                .refresher
                .state
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            RefreshState::Idle,
        );
        if let RefreshState::Refreshing { waiters } = previous {
            if !waiters.is_empty() {
                tracing::debug!(waiters = waiters.len(), "releasing requests held for refresh");
            }
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(Err(ApiError::Network("token refresh cancelled".to_string())));
        }
    }
}

impl std::fmt::Debug for CredentialRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRefresher")
            .field("refresh_url", &self.refresh_url)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}
