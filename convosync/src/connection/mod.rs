//! Live-channel connection management.
//!
//! Defines the [`Connector`]/[`Channel`] trait seam that the supervisor
//! drives. Concrete implementations:
//! - [`ws::WsConnector`] — WebSocket channel against the real backend
//! - [`loopback::LoopbackConnector`] — in-process pair for testing
//!
//! The [`ConnectionManager`] owns the connection lifecycle: it walks the
//! status state machine, fans decoded events out to subscribers, and
//! reconnects with bounded exponential backoff. It never replays
//! subscriptions — callers re-issue their joins when the status returns
//! to connected.

pub mod loopback;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use convosync_proto::event::{ClientAction, ConnectionStatus, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Authentication material for the channel handshake.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Bearer token proving the actor's identity.
    pub token: String,
    /// The actor's user identifier.
    pub user_id: String,
    /// Whether the actor connects as the admin side.
    pub admin: bool,
}

/// Errors surfaced by a live channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel closed.
    #[error("channel closed (server initiated: {server_initiated})")]
    Closed {
        /// `true` when the server sent a close frame, as opposed to the
        /// link dropping.
        server_initiated: bool,
    },

    /// The connection attempt timed out.
    #[error("connection attempt timed out")]
    Timeout,

    /// The server refused the handshake.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// An underlying I/O error occurred.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One established live channel.
pub trait Channel: Send + Sync + 'static {
    /// Emits an action to the server. Fire-and-forget from the caller's
    /// perspective; an error here means the channel is dead.
    fn send(
        &self,
        action: &ClientAction,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Receives the next decoded server event. Malformed frames are
    /// skipped inside the implementation, never surfaced here.
    fn recv(&self) -> impl std::future::Future<Output = Result<ServerEvent, ChannelError>> + Send;

    /// Whether the channel is still open.
    fn is_open(&self) -> bool;
}

/// Factory for live channels; one fresh channel per (re)connect attempt.
pub trait Connector: Send + Sync + 'static {
    /// The channel type this connector produces.
    type Channel: Channel;

    /// Establishes a new channel.
    fn connect(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<Self::Channel, ChannelError>> + Send;
}

/// Reconnection policy: bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the doubling delay.
    pub max_delay: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay before the given 1-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        doubled.min(self.max_delay)
    }
}

/// Supervises the live connection.
///
/// Owns a supervisor task that connects, pumps events into a broadcast
/// channel, and reconnects per the [`ReconnectConfig`]. Status changes
/// flow through a watch channel so callers can react to every
/// transition, in particular the return to `Connected` after which they
/// must re-issue their joins.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    reconnect: ReconnectConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    event_tx: broadcast::Sender<ServerEvent>,
    channel: Arc<Mutex<Option<Arc<C::Channel>>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a manager in the disconnected state.
    #[must_use]
    pub fn new(connector: C, reconnect: ReconnectConfig, event_buffer: usize) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (event_tx, _) = broadcast::channel(event_buffer);
        Self {
            connector: Arc::new(connector),
            reconnect,
            status_tx,
            event_tx,
            channel: Arc::new(Mutex::new(None)),
            supervisor: Mutex::new(None),
        }
    }

    /// Starts the connection supervisor.
    ///
    /// With no credentials the status moves to `Error` and nothing
    /// connects. Calling `start` while a supervisor is already running is
    /// a no-op.
    pub fn start(&self, credentials: Option<Credentials>) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("connection supervisor already running");
            return;
        }
        let Some(credentials) = credentials else {
            warn!("no credentials, live channel unavailable");
            self.status_tx.send_replace(ConnectionStatus::Error);
            return;
        };

        let connector = Arc::clone(&self.connector);
        let reconnect = self.reconnect.clone();
        let status_tx = self.status_tx.clone();
        let event_tx = self.event_tx.clone();
        let channel_slot = Arc::clone(&self.channel);
        *supervisor = Some(tokio::spawn(async move {
            supervise(
                &*connector,
                &credentials,
                &reconnect,
                &status_tx,
                &event_tx,
                &channel_slot,
            )
            .await;
        }));
    }

    /// Emits an action if, and only if, the channel is currently
    /// connected. Actions are never queued.
    pub async fn emit(&self, action: ClientAction) {
        if !self.status().is_live() {
            debug!(action = action.name(), "not connected, dropping action");
            return;
        }
        let channel = self.channel.lock().clone();
        if let Some(channel) = channel
            && let Err(e) = channel.send(&action).await
        {
            debug!(action = action.name(), error = %e, "emit failed");
        }
    }

    /// Subscribes to the decoded server event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.event_tx.subscribe()
    }

    /// Watches connection status transitions.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// The current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Tears down the supervisor and the channel.
    pub fn shutdown(&self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
        self.channel.lock().take();
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        info!("connection manager shut down");
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
    }
}

/// Connect-pump-reconnect loop.
async fn supervise<C: Connector>(
    connector: &C,
    credentials: &Credentials,
    reconnect: &ReconnectConfig,
    status_tx: &watch::Sender<ConnectionStatus>,
    event_tx: &broadcast::Sender<ServerEvent>,
    channel_slot: &Mutex<Option<Arc<C::Channel>>>,
) {
    status_tx.send_replace(ConnectionStatus::Connecting);
    let mut attempt: u32 = 0;

    loop {
        match connector.connect(credentials).await {
            Ok(channel) => {
                attempt = 0;
                let channel = Arc::new(channel);
                *channel_slot.lock() = Some(Arc::clone(&channel));
                status_tx.send_replace(ConnectionStatus::Connected);
                info!("live channel connected");

                let server_initiated = pump(channel.as_ref(), event_tx).await;
                channel_slot.lock().take();
                warn!(server_initiated, "live channel lost");
                if server_initiated {
                    // The server hung up on purpose; retry right away
                    // with a fresh backoff budget.
                    status_tx.send_replace(ConnectionStatus::Reconnecting { attempt: 1 });
                    continue;
                }
            }
            Err(e) => {
                debug!(attempt, error = %e, "connection attempt failed");
            }
        }

        attempt += 1;
        if attempt > reconnect.max_attempts {
            status_tx.send_replace(ConnectionStatus::ReconnectFailed);
            warn!(
                attempts = reconnect.max_attempts,
                "reconnect attempts exhausted"
            );
            return;
        }
        status_tx.send_replace(ConnectionStatus::Reconnecting { attempt });
        tokio::time::sleep(reconnect.delay_for(attempt)).await;
    }
}

/// Pumps events from the channel into the broadcast stream until the
/// channel dies. Returns whether the close was server-initiated.
async fn pump<Ch: Channel>(channel: &Ch, event_tx: &broadcast::Sender<ServerEvent>) -> bool {
    loop {
        match channel.recv().await {
            Ok(event) => {
                // Dropped only when there are no subscribers yet.
                let _ = event_tx.send(event);
            }
            Err(ChannelError::Closed { server_initiated }) => return server_initiated,
            Err(e) => {
                warn!(error = %e, "channel receive failed");
                return false;
            }
        }
    }
}
