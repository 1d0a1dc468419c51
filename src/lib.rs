//! Chathub client library.
//!
//! Keeps an authenticated session with the chat backend: a persisted token
//! pair, a REST client that refreshes credentials on 401, and four real-time
//! hubs with reconnect, an outbound retry queue and typed event fan-out.

pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod session;
pub mod storage;
pub mod token_store;

pub use api::{ApiClient, AuthEvent, CredentialRefresher};
pub use chathub_shared as shared;
pub use config::{ClientConfig, TokenPersistence};
pub use error::{HubError, SessionError};
pub use hub::{ConnectionState, Delivery, HubClient, LifecycleEvent, ReconnectConfig};
pub use session::Session;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use token_store::TokenStore;
