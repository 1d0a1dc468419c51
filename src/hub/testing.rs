//! In-memory transport for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chathub_shared::HubName;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use super::connection::{ConnectionState, HubConnection, ReconnectConfig};
use super::transport::{HubSession, HubTransport, SessionEvent};
use crate::error::{HubError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedInvocation {
    pub hub: HubName,
    pub target: String,
    pub arguments: Vec<Value>,
}

struct LiveSession {
    hub: HubName,
    open: Arc<AtomicBool>,
    inbound: UnboundedSender<SessionEvent>,
}

#[derive(Default)]
struct MockState {
    unreachable: AtomicBool,
    failing_connects: AtomicUsize,
    connects: AtomicUsize,
    failing_invocations: AtomicUsize,
    invocations: Mutex<Vec<RecordedInvocation>>,
    tokens: Mutex<Vec<Option<String>>>,
    sessions: Mutex<Vec<LiveSession>>,
    connect_delay: Mutex<Duration>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two attempts, millisecond delays
    pub fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// The next `n` connect attempts are refused.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Every connect attempt takes this long before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock().unwrap() = delay;
    }

    /// The next `n` invocations fail with a remote error.
    pub fn fail_next_invocations(&self, n: usize) {
        self.state.failing_invocations.store(n, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.state.tokens.lock().unwrap().clone()
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.state.invocations.lock().unwrap().clone()
    }

    pub fn targets(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.target).collect()
    }

    /// Kill every open session as a network failure would.
    pub fn drop_connections(&self) {
        self.drop_where(|_| true);
    }

    /// Kill the open sessions of one hub.
    pub fn drop_hub(&self, hub: HubName) {
        self.drop_where(|h| h == hub);
    }

    fn drop_where(&self, matches: impl Fn(HubName) -> bool) {
        self.state.sessions.lock().unwrap().retain(|session| {
            if !matches(session.hub) {
                return true;
            }
            if session.open.swap(false, Ordering::SeqCst) {
                let _ = session.inbound.send(SessionEvent::Closed {
                    error: Some("connection reset".to_string()),
                });
            }
            false
        });
    }

    /// Push a server invocation to every open session of `hub`.
    pub fn push_event(&self, hub: HubName, target: &str, arguments: Vec<Value>) {
        for session in self.state.sessions.lock().unwrap().iter() {
            if session.hub == hub && session.open.load(Ordering::SeqCst) {
                let _ = session.inbound.send(SessionEvent::Invocation {
                    target: target.to_string(),
                    arguments: arguments.clone(),
                });
            }
        }
    }
}

fn hub_of(url: &Url) -> HubName {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.parse().ok())
        .unwrap_or(HubName::Chat)
}

#[async_trait]
impl HubTransport for MockTransport {
    async fn connect(
        &self,
        url: &Url,
        access_token: Option<&str>,
        inbound: UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn HubSession>> {
        let delay = *self.state.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state
            .tokens
            .lock()
            .unwrap()
            .push(access_token.map(str::to_string));
        let refused = self
            .state
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused || self.state.unreachable.load(Ordering::SeqCst) {
            return Err(HubError::ConnectionClosed("connection refused".to_string()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let hub = hub_of(url);
        let open = Arc::new(AtomicBool::new(true));
        self.state.sessions.lock().unwrap().push(LiveSession {
            hub,
            open: open.clone(),
            inbound: inbound.clone(),
        });
        Ok(Arc::new(MockSession {
            hub,
            open,
            inbound,
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    hub: HubName,
    open: Arc<AtomicBool>,
    inbound: UnboundedSender<SessionEvent>,
    state: Arc<MockState>,
}

#[async_trait]
impl HubSession for MockSession {
    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(HubError::ConnectionClosed("session closed".to_string()));
        }
        let failing = self
            .state
            .failing_invocations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HubError::Remote {
                method: target.to_string(),
                message: "rejected".to_string(),
            });
        }
        self.state
            .invocations
            .lock()
            .unwrap()
            .push(RecordedInvocation {
                hub: self.hub,
                target: target.to_string(),
                arguments,
            });
        Ok(Value::Null)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.inbound.send(SessionEvent::Closed { error: None });
        }
    }
}

/// Wait (bounded) until the connection state satisfies `predicate`.
pub async fn wait_for_state(conn: &HubConnection, predicate: impl Fn(&ConnectionState) -> bool) {
    let mut changes = conn.state_changes();
    tokio::time::timeout(Duration::from_secs(2), changes.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}
