//! Transport seam between a hub connection and the wire.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::error::Result;

/// Something the live session pushes up to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Server-to-client invocation (a pushed event)
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    /// The session is gone. `error` is `None` for a clean close.
    Closed { error: Option<String> },
}

/// Opens sessions to a hub endpoint.
#[async_trait]
pub trait HubTransport: Send + Sync + 'static {
    /// Connect and complete the protocol handshake. Pushed events and the
    /// final close notification are delivered through `inbound`; exactly one
    /// `Closed` is sent per session.
    async fn connect(
        &self,
        url: &Url,
        access_token: Option<&str>,
        inbound: UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn HubSession>>;
}

/// One open connection.
#[async_trait]
pub trait HubSession: Send + Sync {
    /// Invoke `target` and wait for its completion.
    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value>;

    /// Close without reporting an error. Safe to call more than once.
    async fn close(&self);
}
