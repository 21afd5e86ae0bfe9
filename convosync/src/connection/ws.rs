//! WebSocket live channel.
//!
//! Authenticates via query parameters on the handshake URL and exchanges
//! JSON text frames using the codec in [`convosync_proto::codec`].
//! A background reader task decodes incoming frames; malformed or
//! unknown frames are logged and skipped so one bad frame never tears
//! down the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use convosync_proto::codec;
use convosync_proto::event::{ClientAction, ServerEvent};

use super::{Channel, ChannelError, Connector, Credentials};

/// Write half of the WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// Read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

enum Inbound {
    Event(ServerEvent),
    Closed { server_initiated: bool },
}

/// Connector producing [`WsChannel`]s against a real backend.
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector for the given `ws://` or `wss://` endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    fn handshake_url(&self, credentials: &Credentials) -> Result<url::Url, ChannelError> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| ChannelError::Rejected(format!("bad endpoint URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("token", &credentials.token)
            .append_pair("userId", &credentials.user_id)
            .append_pair("role", if credentials.admin { "admin" } else { "user" });
        Ok(url)
    }
}

impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn connect(&self, credentials: &Credentials) -> Result<WsChannel, ChannelError> {
        let url = self.handshake_url(credentials)?;
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %self.url, "WebSocket connect timed out");
                    ChannelError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = %self.url, err = %e, "WebSocket connect failed");
                    map_ws_connect_error(e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(256);
        let open = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&open)));

        Ok(WsChannel {
            sender: Arc::new(Mutex::new(ws_sender)),
            inbound: Mutex::new(rx),
            open,
            _reader_handle: reader_handle,
        })
    }
}

/// One established WebSocket channel.
pub struct WsChannel {
    sender: Arc<Mutex<WsSender>>,
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    open: Arc<AtomicBool>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl Channel for WsChannel {
    async fn send(&self, action: &ClientAction) -> Result<(), ChannelError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(ChannelError::Closed {
                server_initiated: false,
            });
        }
        let frame = codec::encode_action(action);
        let mut sender = self.sender.lock().await;
        sender
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "WebSocket send failed");
                self.open.store(false, Ordering::Relaxed);
                ChannelError::Closed {
                    server_initiated: false,
                }
            })
    }

    async fn recv(&self) -> Result<ServerEvent, ChannelError> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(Inbound::Event(event)) => Ok(event),
            Some(Inbound::Closed { server_initiated }) => {
                Err(ChannelError::Closed { server_initiated })
            }
            None => Err(ChannelError::Closed {
                server_initiated: false,
            }),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

/// Background task that decodes incoming frames.
///
/// Exits when the socket closes or errors out; a server close frame is
/// reported distinctly so the supervisor can reconnect immediately.
async fn reader_loop(mut ws_reader: WsReader, tx: mpsc::Sender<Inbound>, open: Arc<AtomicBool>) {
    let mut server_initiated = false;
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => match codec::decode_event(&text) {
                Ok(event) => {
                    if tx.send(Inbound::Event(event)).await.is_err() {
                        // Channel dropped on the consumer side.
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "bad frame, skipping");
                }
            },
            Ok(WsMessage::Close(_)) => {
                tracing::info!("WebSocket closed by server");
                server_initiated = true;
                break;
            }
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_)) => {}
            Ok(WsMessage::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    open.store(false, Ordering::Relaxed);
    let _ = tx.send(Inbound::Closed { server_initiated }).await;
    tracing::debug!("WebSocket reader task exiting");
}

/// Maps a `tokio_tungstenite` connection error to a [`ChannelError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => ChannelError::Io(io_err),
        WsError::Http(response) => {
            ChannelError::Rejected(format!("handshake status {}", response.status()))
        }
        WsError::Tls(_) => ChannelError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        other => ChannelError::Io(std::io::Error::other(format!("connection error: {other}"))),
    }
}
