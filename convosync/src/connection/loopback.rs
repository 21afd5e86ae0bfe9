//! In-process channel pair for testing.
//!
//! [`LoopbackConnector::new`] returns a connector plus a
//! [`LoopbackServer`] handle playing the backend's role: it can push
//! events, observe emitted actions, refuse handshakes, and sever the
//! link to exercise the reconnect path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use convosync_proto::event::{ClientAction, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Channel, ChannelError, Connector, Credentials};

enum Frame {
    Event(ServerEvent),
    Close { server_initiated: bool },
}

struct Link {
    frame_tx: mpsc::UnboundedSender<Frame>,
    open: Arc<AtomicBool>,
}

struct Shared {
    actions_tx: mpsc::UnboundedSender<ClientAction>,
    current: Mutex<Option<Link>>,
    refuse: AtomicBool,
    connects: AtomicU32,
}

/// Connector half of an in-process pair.
pub struct LoopbackConnector {
    shared: Arc<Shared>,
}

/// Backend half of an in-process pair.
pub struct LoopbackServer {
    shared: Arc<Shared>,
    actions_rx: mpsc::UnboundedReceiver<ClientAction>,
}

impl LoopbackConnector {
    /// Creates a connected connector/server pair.
    #[must_use]
    pub fn new() -> (Self, LoopbackServer) {
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            actions_tx,
            current: Mutex::new(None),
            refuse: AtomicBool::new(false),
            connects: AtomicU32::new(0),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            LoopbackServer { shared, actions_rx },
        )
    }
}

impl Connector for LoopbackConnector {
    type Channel = LoopbackChannel;

    async fn connect(&self, _credentials: &Credentials) -> Result<LoopbackChannel, ChannelError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Rejected("refused by test server".into()));
        }
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        *self.shared.current.lock() = Some(Link {
            frame_tx,
            open: Arc::clone(&open),
        });
        Ok(LoopbackChannel {
            actions_tx: self.shared.actions_tx.clone(),
            frames: tokio::sync::Mutex::new(frame_rx),
            open,
        })
    }
}

/// Channel half handed to the connection manager.
pub struct LoopbackChannel {
    actions_tx: mpsc::UnboundedSender<ClientAction>,
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    open: Arc<AtomicBool>,
}

impl Channel for LoopbackChannel {
    async fn send(&self, action: &ClientAction) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed {
                server_initiated: false,
            });
        }
        self.actions_tx
            .send(action.clone())
            .map_err(|_| ChannelError::Closed {
                server_initiated: false,
            })
    }

    async fn recv(&self) -> Result<ServerEvent, ChannelError> {
        let mut frames = self.frames.lock().await;
        match frames.recv().await {
            Some(Frame::Event(event)) => Ok(event),
            Some(Frame::Close { server_initiated }) => {
                self.open.store(false, Ordering::SeqCst);
                Err(ChannelError::Closed { server_initiated })
            }
            None => {
                self.open.store(false, Ordering::SeqCst);
                Err(ChannelError::Closed {
                    server_initiated: false,
                })
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl LoopbackServer {
    /// Pushes an event to the currently connected channel.
    pub fn push(&self, event: ServerEvent) {
        if let Some(link) = self.shared.current.lock().as_ref() {
            let _ = link.frame_tx.send(Frame::Event(event));
        }
    }

    /// Closes the current channel, optionally as a deliberate
    /// server-side disconnect.
    pub fn sever(&self, server_initiated: bool) {
        if let Some(link) = self.shared.current.lock().take() {
            link.open.store(false, Ordering::SeqCst);
            let _ = link.frame_tx.send(Frame::Close { server_initiated });
        }
    }

    /// Makes subsequent handshakes fail until cleared.
    pub fn set_refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connection attempts observed.
    #[must_use]
    pub fn connect_count(&self) -> u32 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Awaits the next action emitted by the client.
    pub async fn next_action(&mut self) -> Option<ClientAction> {
        self.actions_rx.recv().await
    }

    /// Returns the next already-emitted action without waiting.
    pub fn try_next_action(&mut self) -> Option<ClientAction> {
        self.actions_rx.try_recv().ok()
    }
}
