//! Real-time hub client.
//!
//! This module provides:
//! - Connection management with auto-reconnect per hub
//! - An ordered retry queue for message sends while a hub is down
//! - Typed fan-out of server-pushed events to subscribers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      HubClient                       │
//! └──────────────────────────────────────────────────────┘
//!        │ invoke              │ start/stop       │ on/off
//!        ▼                     ▼                  ▼
//! ┌──────────────────┐ ┌─────────────────┐ ┌─────────────┐
//! │OutboundDispatcher│─▶ ChannelRegistry │ │ EventRouter │
//! │ (per-hub queues) │ │                 │ │             │
//! └──────────────────┘ └─────────────────┘ └─────────────┘
//!                              │                  ▲
//!          ┌───────────────────┼───────────────┐  │ pushed
//!          ▼                   ▼               ▼  │ events
//!   ┌─────────────┐     ┌─────────────┐   ┌───────┴─────┐
//!   │HubConnection│     │HubConnection│   │HubConnection│
//!   │   (chat)    │     │   (group)   │   │    (...)    │
//!   └─────────────┘     └─────────────┘   └─────────────┘
//!          │                   │                 │
//!          └───────────────────┼─────────────────┘
//!                              ▼
//!                   ┌─────────────────────┐
//!                   │    HubTransport     │
//!                   │ (WebSocket / mock)  │
//!                   └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let client = HubClient::connect_with(&ClientConfig::from_env())?;
//! client.initialize(&access_token)?;
//! client.start_all().await;
//!
//! let handle = client.subscribe(HubName::Chat, HubEventKind::ReceiveMessage, |event| {
//!     println!("{event:?}");
//! })?;
//! client.send_message("chat-1", "hello").await?;
//! client.off(HubName::Chat, HubEventKind::ReceiveMessage, &handle);
//! ```

mod client;
mod connection;
mod dispatcher;
mod factory;
mod registry;
mod router;
mod transport;
mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use client::HubClient;
pub use connection::{
    AccessTokenFactory, ConnectionState, HubConnection, InvocationHandler, LifecycleEvent,
    ReconnectConfig,
};
pub use dispatcher::{Delivery, DrainReport, OutboundDispatcher, QueuedOperation};
pub use factory::ConnectionFactory;
pub use registry::{ChannelRegistry, CredentialCell};
pub use router::{EventCallback, EventRouter};
pub use transport::{HubSession, HubTransport, SessionEvent};
pub use websocket::{endpoint_url, WebSocketTransport};
