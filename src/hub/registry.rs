//! The set of hub connections for one authenticated session.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use chathub_shared::HubName;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use super::connection::{AccessTokenFactory, ConnectionState, HubConnection, LifecycleEvent};
use super::factory::ConnectionFactory;
use crate::error::{HubError, Result};

/// The credential every hub connection reads on (re)connect.
#[derive(Debug, Default)]
pub struct CredentialCell {
    token: RwLock<Option<String>>,
}

impl CredentialCell {
    pub fn set(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }

    pub fn get(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AccessTokenFactory for CredentialCell {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.get())
    }
}

/// Owns at most one connection per hub.
///
/// An unexpected close of any connection (its reconnect policy gave up)
/// triggers [`start_all`](Self::start_all) again, unless the registry was
/// stopped explicitly. Starts and stops are serialized, so once `stop_all`
/// returns no restart is left running.
pub struct ChannelRegistry {
    factory: ConnectionFactory,
    hubs: Vec<HubName>,
    credential: Arc<CredentialCell>,
    channels: RwLock<BTreeMap<HubName, Arc<HubConnection>>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    transitions: AsyncMutex<()>,
    me: Weak<ChannelRegistry>,
}

impl ChannelRegistry {
    pub fn new(factory: ConnectionFactory, hubs: Vec<HubName>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            factory,
            hubs,
            credential: Arc::new(CredentialCell::default()),
            channels: RwLock::new(BTreeMap::new()),
            watchers: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            transitions: AsyncMutex::new(()),
            me: me.clone(),
        })
    }

    /// Store `jwt` and create every missing connection. Existing connections
    /// are kept as they are. Must be called within a tokio runtime.
    pub fn initialize(&self, jwt: &str) -> Result<()> {
        self.credential.set(Some(jwt.to_string()));

        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        for &hub in &self.hubs {
            if channels.contains_key(&hub) {
                continue;
            }
            let supplier: Arc<dyn AccessTokenFactory> = self.credential.clone();
            let connection = self.factory.create(hub, supplier)?;
            self.watch(&connection);
            channels.insert(hub, connection);
            tracing::debug!(%hub, "hub channel created");
        }
        Ok(())
    }

    /// Start every `Disconnected` channel in turn. Failures are logged per
    /// channel and never stop the remaining ones.
    pub async fn start_all(&self) {
        let _transition = self.transitions.lock().await;
        self.stopped.store(false, Ordering::SeqCst);
        self.start_disconnected().await;
    }

    /// Stop every channel and forget the credential. Channels are kept, so a
    /// later `start_all` reuses them.
    pub async fn stop_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Cancels connects in flight, so a running restart gives up quickly
        self.stop_channels().await;

        let _transition = self.transitions.lock().await;
        self.stop_channels().await;
        self.credential.set(None);
        tracing::info!("all hubs stopped");
    }

    /// Replace the credential used by the next (re)connect of every channel.
    pub fn set_credential(&self, jwt: Option<String>) {
        self.credential.set(jwt);
    }

    pub fn credential(&self) -> Option<String> {
        self.credential.get()
    }

    pub fn channel(&self, hub: HubName) -> Result<Arc<HubConnection>> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&hub)
            .cloned()
            .ok_or(HubError::NotInitialized(hub))
    }

    /// `Disconnected` for hubs that were never initialized.
    pub fn state(&self, hub: HubName) -> ConnectionState {
        self.channel(hub)
            .map(|c| c.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn channels(&self) -> Vec<Arc<HubConnection>> {
        self.snapshot()
    }

    pub fn is_initialized(&self) -> bool {
        !self
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<HubConnection>> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    async fn stop_channels(&self) {
        for connection in self.snapshot() {
            connection.stop().await;
        }
    }

    /// Caller holds `transitions`.
    async fn start_disconnected(&self) {
        for connection in self.snapshot() {
            if self.stopped.load(Ordering::SeqCst) {
                tracing::debug!("registry stopped, not starting remaining hubs");
                return;
            }
            if connection.state() != ConnectionState::Disconnected {
                continue;
            }
            let hub = connection.hub();
            match connection.start().await {
                Ok(()) => tracing::info!(%hub, "hub started"),
                Err(e) => tracing::error!(%hub, error = %e, "error starting hub"),
            }
        }
    }

    fn watch(&self, connection: &Arc<HubConnection>) {
        let mut events = connection.subscribe_lifecycle();
        let hub = connection.hub();
        let registry = self.me.clone();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LifecycleEvent::Closed { error }) => {
                        let Some(registry) = registry.upgrade() else {
                            return;
                        };
                        let _transition = registry.transitions.lock().await;
                        if registry.stopped.load(Ordering::SeqCst) {
                            continue;
                        }
                        tracing::warn!(%hub, error = ?error, "hub disconnected, restarting hubs");
                        registry.start_disconnected().await;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return,
                }
            }
        });
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        for handle in self
            .watchers
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let states: Vec<(HubName, ConnectionState)> = self
            .snapshot()
            .iter()
            .map(|c| (c.hub(), c.state()))
            .collect();
        f.debug_struct("ChannelRegistry")
            .field("channels", &states)
            .finish()
    }
}
