//! Hub transport over tokio-tungstenite.
//!
//! Negotiation is skipped: the client opens the WebSocket directly, sends the
//! JSON protocol handshake and then exchanges separator-terminated frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chathub_shared::protocol::{
    CompletionMessage, FrameBuffer, HandshakeRequest, HandshakeResponse, HubMessage,
    InvocationMessage, ACCESS_TOKEN_PARAM,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::transport::{HubSession, HubTransport, SessionEvent};
use crate::config::ClientConfig;
use crate::error::{HubError, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    keep_alive_interval: Duration,
    server_timeout: Duration,
    invoke_timeout: Option<Duration>,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl WebSocketTransport {
    pub fn new(
        keep_alive_interval: Duration,
        server_timeout: Duration,
        invoke_timeout: Option<Duration>,
    ) -> Self {
        Self {
            keep_alive_interval,
            server_timeout,
            invoke_timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.keep_alive_interval,
            config.server_timeout,
            config.invoke_timeout,
        )
    }
}

/// The WebSocket URL for a hub endpoint: `http(s)` becomes `ws(s)` and the
/// token, if any, rides along as a query parameter.
pub fn endpoint_url(url: &Url, access_token: Option<&str>) -> Result<Url> {
    let mut endpoint = url.clone();
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(HubError::UnsupportedScheme(other.to_string())),
    };
    endpoint
        .set_scheme(scheme)
        .map_err(|_| HubError::UnsupportedScheme(url.scheme().to_string()))?;
    if let Some(token) = access_token {
        endpoint
            .query_pairs_mut()
            .append_pair(ACCESS_TOKEN_PARAM, token);
    }
    Ok(endpoint)
}

fn connect_error(e: tungstenite::Error) -> HubError {
    match &e {
        tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
            HubError::Unauthorized
        }
        _ => HubError::WebSocket(e),
    }
}

#[async_trait]
impl HubTransport for WebSocketTransport {
    async fn connect(
        &self,
        url: &Url,
        access_token: Option<&str>,
        inbound: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn HubSession>> {
        let endpoint = endpoint_url(url, access_token)?;
        let (socket, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(connect_error)?;
        tracing::debug!(url = %url, "websocket open, sending handshake");

        let (mut write, mut read) = socket.split();
        write
            .send(Message::text(HandshakeRequest::default().encode()?))
            .await?;

        let mut buffer = FrameBuffer::default();
        let leftover = tokio::time::timeout(
            self.server_timeout,
            read_handshake(&mut read, &mut buffer),
        )
        .await
        .map_err(|_| HubError::Timeout)??;
        tracing::debug!(url = %url, "handshake complete");

        let shared = Arc::new(Shared {
            label: url.path().to_string(),
            pending: Mutex::new(Pending::default()),
            next_id: AtomicU64::new(1),
            inbound,
            shutdown: Notify::new(),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(write, outbound_rx));
        tokio::spawn(read_loop(
            shared.clone(),
            read,
            buffer,
            leftover,
            outbound.clone(),
            self.keep_alive_interval,
            self.server_timeout,
        ));

        Ok(Arc::new(WebSocketSession {
            shared,
            outbound,
            invoke_timeout: self.invoke_timeout,
        }))
    }
}

/// Returns frames that arrived in the same message after the handshake reply.
async fn read_handshake(
    read: &mut SplitStream<Socket>,
    buffer: &mut FrameBuffer,
) -> Result<Vec<String>> {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                let mut frames = buffer.push(text.as_str());
                if frames.is_empty() {
                    continue;
                }
                let reply = frames.remove(0);
                HandshakeResponse::parse(&reply)?;
                return Ok(frames);
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default();
                return Err(HubError::ConnectionClosed(format!(
                    "closed during handshake {reason}"
                )));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(HubError::ConnectionClosed(
                    "closed during handshake".to_string(),
                ))
            }
        }
    }
}

type PendingCall = (String, oneshot::Sender<Result<Value>>);

#[derive(Default)]
struct Pending {
    closed: bool,
    calls: HashMap<String, PendingCall>,
}

struct Shared {
    label: String,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    inbound: mpsc::UnboundedSender<SessionEvent>,
    shutdown: Notify,
}

impl Shared {
    fn complete(&self, completion: CompletionMessage) {
        let call = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .remove(&completion.invocation_id);
        let Some((method, reply)) = call else {
            tracing::debug!(id = %completion.invocation_id, "completion for unknown invocation");
            return;
        };
        let outcome = match completion.error {
            Some(message) => Err(HubError::Remote { method, message }),
            None => Ok(completion.result.unwrap_or(Value::Null)),
        };
        let _ = reply.send(outcome);
    }

    /// Returns `Some(close_error)` if the frame closes the session.
    fn handle_frame(&self, frame: &str) -> Option<Option<String>> {
        match HubMessage::parse(frame) {
            Ok(HubMessage::Invocation(invocation)) => {
                let _ = self.inbound.send(SessionEvent::Invocation {
                    target: invocation.target,
                    arguments: invocation.arguments,
                });
            }
            Ok(HubMessage::Completion(completion)) => self.complete(completion),
            Ok(HubMessage::Ping) => {}
            Ok(HubMessage::Close(close)) => return Some(close.error),
            Ok(HubMessage::Ignored(kind)) => {
                tracing::debug!(hub = %self.label, kind, "ignoring frame");
            }
            Err(e) => tracing::warn!(hub = %self.label, error = %e, "malformed frame"),
        }
        None
    }

    /// Fail outstanding calls and report the close, once.
    fn finish(&self, error: Option<String>) {
        let calls = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.closed {
                return;
            }
            pending.closed = true;
            std::mem::take(&mut pending.calls)
        };
        for (_, (method, reply)) in calls {
            let _ = reply.send(Err(HubError::ConnectionClosed(format!(
                "{method} interrupted"
            ))));
        }
        tracing::debug!(hub = %self.label, error = ?error, "session finished");
        let _ = self.inbound.send(SessionEvent::Closed { error });
    }
}

async fn write_loop(
    mut write: SplitSink<Socket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            tracing::debug!(error = %e, "websocket write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = write.close().await;
}

async fn read_loop(
    shared: Arc<Shared>,
    mut read: SplitStream<Socket>,
    mut buffer: FrameBuffer,
    leftover: Vec<String>,
    outbound: mpsc::UnboundedSender<Message>,
    keep_alive_interval: Duration,
    server_timeout: Duration,
) {
    for frame in &leftover {
        if let Some(error) = shared.handle_frame(frame) {
            shared.finish(error);
            return;
        }
    }

    let mut keep_alive =
        tokio::time::interval_at(Instant::now() + keep_alive_interval, keep_alive_interval);
    let idle = tokio::time::sleep(server_timeout);
    tokio::pin!(idle);

    let error = 'session: loop {
        tokio::select! {
            message = read.next() => {
                idle.as_mut().reset(Instant::now() + server_timeout);
                match message {
                    Some(Ok(Message::Text(text))) => {
                        for frame in buffer.push(text.as_str()) {
                            if let Some(error) = shared.handle_frame(&frame) {
                                break 'session error;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break 'session frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|reason| !reason.is_empty())
                            .or_else(|| Some("closed by server".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break 'session Some(e.to_string()),
                    None => break 'session Some("connection closed".to_string()),
                }
            }
            _ = keep_alive.tick() => {
                let ping = match HubMessage::Ping.encode() {
                    Ok(ping) => ping,
                    Err(e) => break 'session Some(e.to_string()),
                };
                if outbound.send(Message::text(ping)).is_err() {
                    break 'session Some("writer stopped".to_string());
                }
            }
            _ = &mut idle => {
                tracing::warn!(hub = %shared.label, "server timeout elapsed without a message");
                break 'session Some("server timeout".to_string());
            }
            _ = shared.shutdown.notified() => break 'session None,
        }
    };

    shared.finish(error);
}

struct WebSocketSession {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Message>,
    invoke_timeout: Option<Duration>,
}

#[async_trait]
impl HubSession for WebSocketSession {
    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let frame = HubMessage::Invocation(InvocationMessage {
            invocation_id: Some(id.clone()),
            target: target.to_string(),
            arguments,
        })
        .encode()?;

        let (reply, outcome) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.closed {
                return Err(HubError::ConnectionClosed("session closed".to_string()));
            }
            pending.calls.insert(id.clone(), (target.to_string(), reply));
        }

        if self.outbound.send(Message::text(frame)).is_err() {
            self.forget(&id);
            return Err(HubError::ConnectionClosed("writer stopped".to_string()));
        }

        let outcome = match self.invoke_timeout {
            Some(limit) => match tokio::time::timeout(limit, outcome).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.forget(&id);
                    return Err(HubError::Timeout);
                }
            },
            None => outcome.await,
        };
        outcome.unwrap_or_else(|_| Err(HubError::ConnectionClosed("session closed".to_string())))
    }

    async fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
        self.shared.shutdown.notify_one();
    }
}

impl WebSocketSession {
    fn forget(&self, id: &str) {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .remove(id);
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        // The reader task would otherwise keep the socket alive
        let _ = self.outbound.send(Message::Close(None));
        self.shared.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_maps_scheme_and_appends_token() {
        let url = Url::parse("https://chat.example.com/hubs/chat").unwrap();
        let endpoint = endpoint_url(&url, Some("a b")).unwrap();
        assert_eq!(
            endpoint.as_str(),
            "wss://chat.example.com/hubs/chat?access_token=a+b"
        );

        let url = Url::parse("http://localhost:5000/hubs/group").unwrap();
        assert_eq!(
            endpoint_url(&url, None).unwrap().as_str(),
            "ws://localhost:5000/hubs/group"
        );
    }

    #[test]
    fn other_schemes_are_rejected() {
        let url = Url::parse("ftp://example.com/hubs/chat").unwrap();
        assert!(matches!(
            endpoint_url(&url, None),
            Err(HubError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }
}
