//! One logical hub connection with state tracking and auto-reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chathub_shared::{HubMethod, HubName};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use url::Url;

use super::transport::{HubSession, HubTransport, SessionEvent};
use crate::error::{HubError, Result};

/// Connection state for a hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> u32 {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        (delay as u32).min(self.max_delay_ms)
    }
}

/// Transitions observers care about beyond the raw state value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected,
    /// The connection dropped and the reconnect policy took over
    Reconnecting,
    Reconnected,
    /// Closed without being asked to, after the reconnect policy gave up
    Closed { error: Option<String> },
    /// Explicit stop
    Stopped,
}

/// Supplies the access token for each (re)connect attempt.
#[async_trait]
pub trait AccessTokenFactory: Send + Sync {
    async fn access_token(&self) -> Result<Option<String>>;
}

#[async_trait]
impl<F> AccessTokenFactory for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self())
    }
}

/// Receives every server-to-client invocation of a connection.
pub type InvocationHandler = Arc<dyn Fn(HubName, &str, Vec<Value>) + Send + Sync>;

/// A managed connection to one hub.
///
/// `start` is only legal from `Disconnected`. Once connected, a background
/// supervisor pumps pushed events into the invocation handler and runs the
/// reconnect policy when the session drops. `stop` cancels the supervisor,
/// including any reconnect attempt in progress.
pub struct HubConnection {
    hub: HubName,
    url: Url,
    transport: Arc<dyn HubTransport>,
    token_factory: Arc<dyn AccessTokenFactory>,
    reconnect: ReconnectConfig,
    on_invocation: InvocationHandler,
    state: watch::Sender<ConnectionState>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    session: RwLock<Option<Arc<dyn HubSession>>>,
    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Bumped by every stop; work started under an older value is stale
    generation: AtomicU64,
    start_lock: Mutex<()>,
}

impl HubConnection {
    pub fn new(
        hub: HubName,
        url: Url,
        transport: Arc<dyn HubTransport>,
        token_factory: Arc<dyn AccessTokenFactory>,
        reconnect: ReconnectConfig,
        on_invocation: InvocationHandler,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (lifecycle, _) = broadcast::channel(32);
        Arc::new(Self {
            hub,
            url,
            transport,
            token_factory,
            reconnect,
            on_invocation,
            state,
            lifecycle,
            session: RwLock::new(None),
            supervisor: std::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            start_lock: Mutex::new(()),
        })
    }

    pub fn hub(&self) -> HubName {
        self.hub
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Connect if currently `Disconnected`; otherwise a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _guard = self.start_lock.lock().await;
        if self.state() != ConnectionState::Disconnected {
            return Ok(());
        }

        let generation = self.generation.load(Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);
        tracing::debug!(hub = %self.hub, url = %self.url, "connecting");

        let (tx, rx) = mpsc::unbounded_channel();
        let session = match self.open_session(tx).await {
            Ok(session) => session,
            Err(e) => {
                if self.is_current(generation) {
                    self.set_state(ConnectionState::Disconnected);
                }
                return Err(e);
            }
        };

        if !self.install(session, generation).await {
            return Err(HubError::Stopped(self.hub));
        }
        tracing::info!(hub = %self.hub, "hub connected");
        self.emit(LifecycleEvent::Connected);

        let handle = tokio::spawn(supervise(Arc::downgrade(self), rx, generation));
        let previous = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    /// Close the connection and cancel any reconnect in progress. Always
    /// ends in `Disconnected`, even if already stopped.
    pub async fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = supervisor {
            handle.abort();
        }

        let session = {
            let mut slot = self.session.write().await;
            self.set_state(ConnectionState::Disconnected);
            slot.take()
        };
        if let Some(session) = session {
            session.close().await;
            tracing::info!(hub = %self.hub, "hub stopped");
        }
        self.emit(LifecycleEvent::Stopped);
    }

    /// Invoke a method on the live session.
    pub async fn invoke(&self, method: HubMethod, arguments: Vec<Value>) -> Result<Value> {
        if !method.is_available_on(self.hub) {
            return Err(HubError::MethodNotOnHub {
                method,
                hub: self.hub,
            });
        }
        let session = self
            .session
            .read()
            .await
            .clone()
            .filter(|_| self.state().is_connected())
            .ok_or(HubError::NotConnected(self.hub))?;

        tracing::debug!(hub = %self.hub, %method, "invoking");
        session.invoke(method.name(), arguments).await
    }

    async fn open_session(
        &self,
        inbound: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn HubSession>> {
        let token = self.token_factory.access_token().await?;
        self.transport
            .connect(&self.url, token.as_deref(), inbound)
            .await
    }

    /// Store a freshly opened session unless a stop happened meanwhile.
    async fn install(&self, session: Arc<dyn HubSession>, generation: u64) -> bool {
        let mut slot = self.session.write().await;
        if !self.is_current(generation) {
            drop(slot);
            session.close().await;
            return false;
        }
        *slot = Some(session);
        self.set_state(ConnectionState::Connected);
        true
    }

    /// Returns the event stream of the new session, or `None` once the
    /// policy is exhausted or the connection was stopped.
    async fn reconnect(&self, generation: u64) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        let mut attempt = 0u32;
        self.emit(LifecycleEvent::Reconnecting);

        loop {
            if self.reconnect.max_attempts > 0 && attempt >= self.reconnect.max_attempts {
                tracing::warn!(
                    hub = %self.hub,
                    attempts = attempt,
                    "reconnect attempts exhausted"
                );
                return None;
            }
            if !self.is_current(generation) {
                return None;
            }

            let delay = self.reconnect.delay_for_attempt(attempt);
            attempt += 1;
            self.set_state(ConnectionState::Reconnecting { attempt });
            tracing::info!(hub = %self.hub, attempt, delay_ms = delay, "reconnecting");
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            if !self.is_current(generation) {
                return None;
            }

            let (tx, rx) = mpsc::unbounded_channel();
            match self.open_session(tx).await {
                Ok(session) => {
                    if !self.install(session, generation).await {
                        return None;
                    }
                    tracing::info!(hub = %self.hub, attempt, "hub reconnected");
                    self.emit(LifecycleEvent::Reconnected);
                    return Some(rx);
                }
                Err(e) => {
                    tracing::warn!(hub = %self.hub, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.lifecycle.send(event);
    }
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("hub", &self.hub)
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

/// Pump session events; reconnect on unexpected close.
async fn supervise(
    connection: Weak<HubConnection>,
    mut inbound: mpsc::UnboundedReceiver<SessionEvent>,
    generation: u64,
) {
    loop {
        let error = loop {
            match inbound.recv().await {
                Some(SessionEvent::Invocation { target, arguments }) => {
                    let Some(conn) = connection.upgrade() else {
                        return;
                    };
                    (conn.on_invocation)(conn.hub, &target, arguments);
                }
                Some(SessionEvent::Closed { error }) => break error,
                None => break Some("session ended without close".to_string()),
            }
        };

        let Some(conn) = connection.upgrade() else {
            return;
        };
        if !conn.is_current(generation) {
            return;
        }
        conn.session.write().await.take();
        tracing::warn!(hub = %conn.hub, error = ?error, "hub connection lost");

        match conn.reconnect(generation).await {
            Some(next) => inbound = next,
            None => {
                if conn.is_current(generation) {
                    conn.set_state(ConnectionState::Disconnected);
                    conn.emit(LifecycleEvent::Closed { error });
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::testing::{wait_for_state, MockTransport};
    use serde_json::json;

    fn connection(transport: &MockTransport, hub: HubName) -> Arc<HubConnection> {
        let url = Url::parse(&format!("http://localhost/hubs/{}", hub.path())).unwrap();
        HubConnection::new(
            hub,
            url,
            Arc::new(transport.clone()),
            Arc::new(|| Some("jwt-1".to_string())),
            MockTransport::fast_reconnect(),
            Arc::new(|_: HubName, _: &str, _: Vec<Value>| {}),
        )
    }

    #[test]
    fn backoff_is_capped() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(0), 1000);
        assert_eq!(config.delay_for_attempt(1), 2000);
        assert_eq!(config.delay_for_attempt(10), 30000);
    }

    #[tokio::test]
    async fn start_connects_and_invokes_with_token() {
        let transport = MockTransport::new();
        let conn = connection(&transport, HubName::Chat);

        conn.start().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(transport.tokens_seen(), vec![Some("jwt-1".to_string())]);

        conn.invoke(HubMethod::SendMessage, vec![json!("c1"), json!("hi")])
            .await
            .unwrap();
        let calls = transport.invocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].hub, HubName::Chat);
        assert_eq!(calls[0].target, "SendMessage");
        assert_eq!(calls[0].arguments, vec![json!("c1"), json!("hi")]);
    }

    #[tokio::test]
    async fn start_is_a_no_op_when_connected() {
        let transport = MockTransport::new();
        let conn = connection(&transport, HubName::Chat);
        conn.start().await.unwrap();
        conn.start().await.unwrap();
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn failed_start_returns_to_disconnected() {
        let transport = MockTransport::new();
        transport.set_reachable(false);
        let conn = connection(&transport, HubName::Search);

        assert!(conn.start().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn wrong_hub_and_disconnected_invokes_are_rejected() {
        let transport = MockTransport::new();
        let conn = connection(&transport, HubName::Search);

        match conn.invoke(HubMethod::SearchForFriend, vec![json!("bob")]).await {
            Err(HubError::NotConnected(HubName::Search)) => {}
            other => panic!("unexpected: {other:?}"),
        }

        conn.start().await.unwrap();
        match conn.invoke(HubMethod::SendMessage, vec![]).await {
            Err(HubError::MethodNotOnHub { method, hub }) => {
                assert_eq!(method, HubMethod::SendMessage);
                assert_eq!(hub, HubName::Search);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(transport.invocations().is_empty());
    }

    #[tokio::test]
    async fn dropped_session_reconnects_with_fresh_token() {
        let transport = MockTransport::new();
        let conn = connection(&transport, HubName::Group);
        let mut lifecycle = conn.subscribe_lifecycle();
        conn.start().await.unwrap();
        assert_eq!(lifecycle.recv().await.unwrap(), LifecycleEvent::Connected);

        transport.drop_connections();
        assert_eq!(lifecycle.recv().await.unwrap(), LifecycleEvent::Reconnecting);
        assert_eq!(lifecycle.recv().await.unwrap(), LifecycleEvent::Reconnected);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_reconnect_reports_closed() {
        let transport = MockTransport::new();
        let conn = connection(&transport, HubName::Chat);
        let mut lifecycle = conn.subscribe_lifecycle();
        conn.start().await.unwrap();
        let _ = lifecycle.recv().await;

        transport.set_reachable(false);
        transport.drop_connections();

        loop {
            match lifecycle.recv().await.unwrap() {
                LifecycleEvent::Closed { error } => {
                    assert!(error.is_some());
                    break;
                }
                LifecycleEvent::Reconnecting => continue,
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn stop_cancels_reconnect_and_allows_restart() {
        let transport = MockTransport::new();
        let conn = connection(&transport, HubName::Chat);
        conn.start().await.unwrap();

        conn.stop().await;
        conn.stop().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        // A drop after stop must not bring the hub back
        transport.drop_connections();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(transport.connect_count(), 1);

        conn.start().await.unwrap();
        wait_for_state(&conn, ConnectionState::is_connected).await;
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn pushed_invocations_reach_the_handler() {
        let transport = MockTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse("http://localhost/hubs/notification").unwrap();
        let conn = HubConnection::new(
            HubName::Notification,
            url,
            Arc::new(transport.clone()),
            Arc::new(|| None),
            MockTransport::fast_reconnect(),
            Arc::new(move |hub: HubName, target: &str, args: Vec<Value>| {
                let _ = tx.send((hub, target.to_string(), args));
            }),
        );
        conn.start().await.unwrap();

        transport.push_event(
            HubName::Notification,
            "ReceiveOnlineStatus",
            vec![json!({"userId": "u1", "isOnline": true})],
        );
        let (hub, target, args) = rx.recv().await.unwrap();
        assert_eq!(hub, HubName::Notification);
        assert_eq!(target, "ReceiveOnlineStatus");
        assert_eq!(args.len(), 1);
        assert_eq!(transport.tokens_seen(), vec![None]);
    }
}
