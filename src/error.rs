use chathub_shared::{HubEventKind, HubMethod, HubName, ProtocolError};
use thiserror::Error;

/// Errors raised by the hub side of the client.
#[derive(Error, Debug)]
pub enum HubError {
    /// WebSocket protocol error (connection failed, invalid frame, etc.)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Malformed frame or rejected handshake
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Unsupported hub URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The hub refused the WebSocket upgrade with 401
    #[error("Hub rejected the access token")]
    Unauthorized,

    /// The credential supplier could not produce a token
    #[error("Credential error: {0}")]
    Credential(String),

    /// The server completed the invocation with an error
    #[error("{method} failed on the server: {message}")]
    Remote { method: String, message: String },

    #[error("Hub {0} is not connected")]
    NotConnected(HubName),

    #[error("Hub {0} has not been initialized")]
    NotInitialized(HubName),

    #[error("{method} is not available on hub {hub}")]
    MethodNotOnHub { method: HubMethod, hub: HubName },

    #[error("{event} is never pushed by hub {hub}")]
    EventNotOnHub { event: HubEventKind, hub: HubName },

    /// The connection went away while the call was outstanding
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The hub was stopped while it was connecting
    #[error("Hub {0} was stopped")]
    Stopped(HubName),

    #[error("Timeout error")]
    Timeout,
}

/// Convenience type alias for `Result<T, HubError>`.
pub type Result<T> = std::result::Result<T, HubError>;

/// Errors from the session flows, which span the REST API and the hubs.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] chathub_shared::ApiError),

    #[error(transparent)]
    Hub(#[from] HubError),
}
