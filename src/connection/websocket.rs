//! Reference WebSocket transport.
//!
//! # Wire Protocol
//! ```text
//! client → server   binary frame: stored identity record (empty if none)
//! server → client   {"type":"ready","registered":bool}
//! server → client   {"type":"authenticated","creds":[..]}   new identity
//! server → client   {"type":"credentials","creds":[..]}     rotation
//! server → client   close frame, code 4000 + status         disconnect reason
//! ```
//!
//! # Design Decisions
//! - One pump task per connection owns both halves of the socket
//! - Handles talk to the pump over a channel, so they are cheap to clone
//! - Any close code outside 4000..5000 and any stream error map to
//!   `ConnectionLost`

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::TransportConfig;
use crate::connection::event::{DisconnectEvent, EventSink, ReasonCode, TransportEvent};
use crate::connection::transport::{AuthState, Handshake, Identity, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Close codes at or above this carry a protocol status.
pub const STATUS_CLOSE_BASE: u16 = 4000;

/// Text frames sent by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ready { registered: bool },
    Authenticated { creds: Vec<u8> },
    Credentials { creds: Vec<u8> },
}

/// Map a close code to a disconnect reason.
pub fn reason_from_close(code: u16) -> ReasonCode {
    if (STATUS_CLOSE_BASE..STATUS_CLOSE_BASE + 1000).contains(&code) {
        ReasonCode::from_status(code - STATUS_CLOSE_BASE)
    } else {
        ReasonCode::ConnectionLost
    }
}

fn close_reason(frame: Option<&CloseFrame>) -> DisconnectEvent {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            DisconnectEvent::new(reason_from_close(code))
                .with_detail(format!("closed with code {code}: {}", frame.reason.as_str()))
        }
        None => DisconnectEvent::new(ReasonCode::ConnectionLost).with_detail("closed without code"),
    }
}

enum Command {
    Send(Vec<u8>),
    Close(oneshot::Sender<()>),
}

/// Handle to a live WebSocket session.
#[derive(Debug, Clone)]
pub struct WsHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl WsHandle {
    /// Queue an application payload. Returns `false` once the socket is gone.
    pub fn send(&self, payload: Vec<u8>) -> bool {
        self.commands.send(Command::Send(payload)).is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send(payload) => write!(f, "Send({} bytes)", payload.len()),
            Self::Close(_) => f.write_str("Close"),
        }
    }
}

/// WebSocket session transport.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.url.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    type Handle = WsHandle;

    async fn open(
        &self,
        auth: AuthState,
        events: EventSink,
    ) -> Result<Handshake<WsHandle>, TransportError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut writer, mut reader) = socket.split();

        let hello = auth.creds().map(<[u8]>::to_vec).unwrap_or_default();
        writer
            .send(Message::binary(hello))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let registered = await_ready(&mut writer, &mut reader).await?;
        let identity = if registered {
            Identity::Known
        } else {
            Identity::Unknown
        };
        tracing::debug!(
            url = %self.url,
            generation = events.generation(),
            registered,
            "WebSocket session ready"
        );

        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(writer, reader, rx, events));

        Ok(Handshake {
            handle: WsHandle { commands },
            identity,
        })
    }

    async fn close(&self, handle: WsHandle) {
        let (ack, done) = oneshot::channel();
        if handle.commands.send(Command::Close(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

/// Read until the gateway's `ready` frame.
async fn await_ready(writer: &mut WsWriter, reader: &mut WsReader) -> Result<bool, TransportError> {
    while let Some(message) = reader.next().await {
        match message.map_err(|e| TransportError::Connect(e.to_string()))? {
            Message::Text(text) => match serde_json::from_str::<ServerFrame>(text.as_str()) {
                Ok(ServerFrame::Ready { registered }) => return Ok(registered),
                Ok(other) => {
                    return Err(TransportError::Protocol(format!(
                        "expected ready frame, got {other:?}"
                    )))
                }
                Err(e) => return Err(TransportError::Protocol(e.to_string())),
            },
            Message::Ping(data) => {
                let _ = writer.send(Message::Pong(data)).await;
            }
            Message::Close(frame) => {
                return Err(TransportError::Rejected(close_reason(frame.as_ref()).reason));
            }
            _ => {}
        }
    }
    Err(TransportError::Connect("stream ended before ready".to_string()))
}

/// Own the socket until it closes or the handle asks it to.
async fn pump(
    mut writer: WsWriter,
    mut reader: WsReader,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: EventSink,
) {
    let ended = loop {
        tokio::select! {
            message = reader.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(ServerFrame::Authenticated { creds }) => {
                            events.emit(TransportEvent::Authenticated(creds));
                        }
                        Ok(ServerFrame::Credentials { creds }) => {
                            events.emit(TransportEvent::CredentialsRotated(creds));
                        }
                        Ok(ServerFrame::Ready { .. }) => {}
                        Err(e) => tracing::warn!(error = %e, "Ignoring malformed gateway frame"),
                    }
                }
                Some(Ok(Message::Binary(payload))) => {
                    tracing::trace!(bytes = payload.len(), "Inbound payload");
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = writer.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => break Some(close_reason(frame.as_ref())),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    break Some(
                        DisconnectEvent::new(ReasonCode::ConnectionLost).with_detail(e.to_string()),
                    )
                }
                None => {
                    break Some(
                        DisconnectEvent::new(ReasonCode::ConnectionLost).with_detail("stream ended"),
                    )
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(payload)) => {
                    if let Err(e) = writer.send(Message::binary(payload)).await {
                        break Some(
                            DisconnectEvent::new(ReasonCode::ConnectionLost)
                                .with_detail(e.to_string()),
                        );
                    }
                }
                Some(Command::Close(ack)) => {
                    let _ = writer.send(Message::Close(None)).await;
                    let _ = writer.close().await;
                    let _ = ack.send(());
                    break None;
                }
                // Every handle was dropped.
                None => {
                    let _ = writer.close().await;
                    break None;
                }
            },
        }
    };

    if let Some(event) = ended {
        tracing::debug!(
            reason = %event.reason,
            generation = events.generation(),
            "WebSocket closed by peer"
        );
        events.emit(TransportEvent::Disconnected(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_mapping() {
        assert_eq!(reason_from_close(4401), ReasonCode::LoggedOut);
        assert_eq!(reason_from_close(4440), ReasonCode::Replaced);
        assert_eq!(reason_from_close(4515), ReasonCode::RestartRequired);
        assert_eq!(reason_from_close(4999), ReasonCode::Unknown);
        assert_eq!(reason_from_close(1000), ReasonCode::ConnectionLost);
        assert_eq!(reason_from_close(1006), ReasonCode::ConnectionLost);
    }

    #[test]
    fn test_server_frame_format() {
        let ready: ServerFrame = serde_json::from_str(r#"{"type":"ready","registered":true}"#).unwrap();
        assert_eq!(ready, ServerFrame::Ready { registered: true });

        let rotated = serde_json::to_string(&ServerFrame::Credentials { creds: vec![1, 2] }).unwrap();
        assert_eq!(rotated, r#"{"type":"credentials","creds":[1,2]}"#);
    }
}
