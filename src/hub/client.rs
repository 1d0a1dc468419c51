//! `HubClient`: the registry, dispatcher and router behind one handle.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chathub_shared::{HubEvent, HubEventKind, HubMethod, HubName};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::connection::{ConnectionState, LifecycleEvent};
use super::dispatcher::{Delivery, DrainReport, OutboundDispatcher, QueuedOperation};
use super::factory::ConnectionFactory;
use super::registry::ChannelRegistry;
use super::router::{EventCallback, EventRouter};
use super::transport::HubTransport;
use super::websocket::WebSocketTransport;
use crate::config::ClientConfig;
use crate::error::Result;

/// Real-time client for one authenticated session.
///
/// Owned explicitly (no global instance). Dropping it cancels its background
/// tasks; call [`stop_all`](Self::stop_all) first to close the hubs cleanly.
pub struct HubClient {
    registry: Arc<ChannelRegistry>,
    dispatcher: Arc<OutboundDispatcher>,
    router: Arc<EventRouter>,
    drain_on_connect: bool,
    drained_hubs: Mutex<HashSet<HubName>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HubClient {
    pub fn new(config: &ClientConfig, transport: Arc<dyn HubTransport>) -> Result<Self> {
        let router = Arc::new(EventRouter::new());
        let factory = ConnectionFactory::new(
            &config.hub_base_url,
            transport,
            config.reconnect.clone(),
            router.clone(),
        )?;
        let registry = ChannelRegistry::new(factory, config.hubs.clone());
        let dispatcher = OutboundDispatcher::new(
            registry.clone(),
            config.max_queue_retries,
            config.queue_retry_delay,
        );
        Ok(Self {
            registry,
            dispatcher,
            router,
            drain_on_connect: config.drain_queue_on_connect,
            drained_hubs: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Client over the WebSocket transport configured from `config`.
    pub fn connect_with(config: &ClientConfig) -> Result<Self> {
        Self::new(config, Arc::new(WebSocketTransport::from_config(config)))
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    /// Create any missing hub channels and store `jwt` for their connects.
    pub fn initialize(&self, jwt: &str) -> Result<()> {
        self.registry.initialize(jwt)?;
        if self.drain_on_connect {
            self.wire_queue_drains();
        }
        Ok(())
    }

    pub async fn start_all(&self) {
        self.registry.start_all().await;
    }

    pub async fn stop_all(&self) {
        self.registry.stop_all().await;
    }

    pub fn set_credential(&self, jwt: Option<String>) {
        self.registry.set_credential(jwt);
    }

    pub fn state(&self, hub: HubName) -> ConnectionState {
        self.registry.state(hub)
    }

    /// State stream of an initialized hub.
    pub fn state_changes(&self, hub: HubName) -> Result<watch::Receiver<ConnectionState>> {
        Ok(self.registry.channel(hub)?.state_changes())
    }

    pub fn subscribe_lifecycle(&self, hub: HubName) -> Result<broadcast::Receiver<LifecycleEvent>> {
        Ok(self.registry.channel(hub)?.subscribe_lifecycle())
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    // ============================================================
    // Outbound
    // ============================================================

    pub async fn invoke(
        &self,
        hub: HubName,
        method: HubMethod,
        arguments: Vec<Value>,
    ) -> Result<Delivery> {
        self.dispatcher.invoke(hub, method, arguments).await
    }

    pub async fn process_queue(&self, hub: HubName) -> DrainReport {
        self.dispatcher.process_queue(hub).await
    }

    pub fn queued(&self, hub: HubName) -> Vec<QueuedOperation> {
        self.dispatcher.queued(hub)
    }

    pub fn discard_queued(&self) -> usize {
        self.dispatcher.discard_all()
    }

    pub async fn join_chat_room(&self, chat_id: &str) -> Result<Delivery> {
        self.invoke(HubName::Chat, HubMethod::JoinChatRoom, vec![json!(chat_id)])
            .await
    }

    pub async fn leave_chat_room(&self, chat_id: &str) -> Result<Delivery> {
        self.invoke(HubName::Chat, HubMethod::LeaveChatRoom, vec![json!(chat_id)])
            .await
    }

    pub async fn join_group_chat_room(&self, chat_id: &str) -> Result<Delivery> {
        self.invoke(HubName::Group, HubMethod::JoinChatRoom, vec![json!(chat_id)])
            .await
    }

    pub async fn leave_group_chat_room(&self, chat_id: &str) -> Result<Delivery> {
        self.invoke(HubName::Group, HubMethod::LeaveChatRoom, vec![json!(chat_id)])
            .await
    }

    /// Queued if the chat hub is unavailable.
    pub async fn send_message(&self, chat_id: &str, message: &str) -> Result<Delivery> {
        self.invoke(
            HubName::Chat,
            HubMethod::SendMessage,
            vec![json!(chat_id), json!(message)],
        )
        .await
    }

    /// Queued if the group hub is unavailable.
    pub async fn send_group_message(&self, chat_id: &str, message: &str) -> Result<Delivery> {
        self.invoke(
            HubName::Group,
            HubMethod::SendGroupMessage,
            vec![json!(chat_id), json!(message)],
        )
        .await
    }

    pub async fn broadcast_message(&self, message: &str) -> Result<Delivery> {
        self.invoke(HubName::Chat, HubMethod::BroadcastMessage, vec![json!(message)])
            .await
    }

    pub async fn fetch_previous_messages(&self, chat_id: &str) -> Result<Delivery> {
        self.invoke(HubName::Chat, HubMethod::GetChatMessages, vec![json!(chat_id)])
            .await
    }

    pub async fn fetch_previous_group_messages(&self, chat_id: &str) -> Result<Delivery> {
        self.invoke(
            HubName::Group,
            HubMethod::GetGroupChatMessages,
            vec![json!(chat_id)],
        )
        .await
    }

    pub async fn fetch_previous_broadcasts(&self) -> Result<Delivery> {
        self.invoke(HubName::Chat, HubMethod::GetPreviousBroadcasts, vec![])
            .await
    }

    pub async fn send_typing_notification(&self, chat_id: &str) -> Result<Delivery> {
        self.invoke(
            HubName::Chat,
            HubMethod::SendTypingNotification,
            vec![json!(chat_id)],
        )
        .await
    }

    pub async fn send_group_typing_notification(&self, chat_id: &str) -> Result<Delivery> {
        self.invoke(
            HubName::Group,
            HubMethod::SendGroupTypingNotification,
            vec![json!(chat_id)],
        )
        .await
    }

    pub async fn search_friend(&self, full_name: &str) -> Result<Delivery> {
        self.invoke(HubName::Search, HubMethod::SearchForFriend, vec![json!(full_name)])
            .await
    }

    pub async fn get_friends_online_status(&self) -> Result<Delivery> {
        self.invoke(HubName::Notification, HubMethod::GetFriendsOnlineStatus, vec![])
            .await
    }

    pub async fn mark_private_as_read(&self, chat_id: &str) -> Result<Delivery> {
        self.invoke(HubName::Chat, HubMethod::MarkPrivateAsRead, vec![json!(chat_id)])
            .await
    }

    pub async fn mark_group_as_read(&self, chat_id: &str) -> Result<Delivery> {
        self.invoke(HubName::Group, HubMethod::MarkGroupAsRead, vec![json!(chat_id)])
            .await
    }

    // ============================================================
    // Inbound
    // ============================================================

    pub fn on(&self, hub: HubName, kind: HubEventKind, callback: EventCallback) -> Result<()> {
        self.router.on(hub, kind, callback)
    }

    /// Register a closure and get back the handle that unregisters it.
    pub fn subscribe<F>(&self, hub: HubName, kind: HubEventKind, callback: F) -> Result<EventCallback>
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        let handle: EventCallback = Arc::new(callback);
        self.router.on(hub, kind, handle.clone())?;
        Ok(handle)
    }

    pub fn off(&self, hub: HubName, kind: HubEventKind, callback: &EventCallback) -> bool {
        self.router.off(hub, kind, callback)
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Drain a hub's queue every time it connects or reconnects.
    fn wire_queue_drains(&self) {
        let mut wired = self.drained_hubs.lock().unwrap_or_else(|e| e.into_inner());
        for connection in self.registry.channels() {
            let hub = connection.hub();
            if !wired.insert(hub) {
                continue;
            }
            let mut events = connection.subscribe_lifecycle();
            let dispatcher = self.dispatcher.clone();
            let handle = tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(LifecycleEvent::Connected | LifecycleEvent::Reconnected) => {
                            let report = dispatcher.process_queue(hub).await;
                            if report.delivered > 0 || report.dropped > 0 {
                                tracing::info!(
                                    %hub,
                                    delivered = report.delivered,
                                    dropped = report.dropped,
                                    remaining = report.remaining,
                                    "drained outbound queue"
                                );
                            }
                        }
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            });
            self.tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);
        }
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        for handle in self
            .tasks
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("registry", &self.registry)
            .field("router", &self.router)
            .finish()
    }
}
