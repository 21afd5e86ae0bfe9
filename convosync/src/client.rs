//! The messaging façade tying the connection, the REST collaborator,
//! and the reconciler together.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use convosync_proto::conversation::{ConversationStatus, ConversationSummary};
use convosync_proto::event::{ClientAction, ConnectionStatus};
use convosync_proto::message::{
    Attachment, LocalIdentity, Message, MessageId, Participant, Timestamp, UserId,
    ValidationError,
};

use crate::api::{ApiError, MessageApi};
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, Connector, Credentials};
use crate::sync::{Reconciler, SyncNotification};

/// Errors from the send pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message failed local validation and was never sent.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// The backend rejected or failed the send; the optimistic echo has
    /// been rolled back.
    #[error("send failed: {0}")]
    Api(#[from] ApiError),
}

/// Client-side engine for one authenticated actor.
///
/// Owns the connection supervisor and the reconciler, and drives the
/// REST collaborator for every operation that needs the backend. All
/// state reads go through snapshot accessors; all mutations flow through
/// the reconciler so its idempotency rules hold.
///
/// Two background tasks run for the client's lifetime: one pumping
/// decoded live events into the reconciler, and one watching the
/// connection status to re-issue `Join` subscriptions after every
/// reconnect (the server does not retain them across connections).
pub struct MessagingClient<A: MessageApi, C: Connector> {
    api: Arc<A>,
    connection: Arc<ConnectionManager<C>>,
    reconciler: Arc<Reconciler>,
    profile: Participant,
    config: SyncConfig,
    epochs: Mutex<HashMap<UserId, u64>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<A: MessageApi, C: Connector> MessagingClient<A, C> {
    /// Creates a client and the notification stream it feeds.
    ///
    /// `profile` is the local actor's own snapshot (used as the sender of
    /// optimistic echoes); `admin` selects the multi-conversation console
    /// semantics.
    #[must_use]
    pub fn new(
        api: A,
        connector: C,
        profile: Participant,
        admin: bool,
        config: SyncConfig,
    ) -> (Self, tokio::sync::mpsc::Receiver<SyncNotification>) {
        let local = LocalIdentity {
            user_id: profile.id.clone(),
            admin,
        };
        let (reconciler, notify_rx) =
            Reconciler::new(local, config.typing_timeout, config.notify_buffer);
        let reconciler = Arc::new(reconciler);
        let connection = Arc::new(ConnectionManager::new(
            connector,
            config.reconnect.clone(),
            config.event_buffer,
        ));

        let mut tasks = Vec::new();

        // Pump decoded live events into the reconciler.
        let mut events = connection.subscribe();
        let event_reconciler = Arc::clone(&reconciler);
        tasks.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => event_reconciler.apply_event(event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // Re-issue joins after every reconnect; typing indicators do not
        // survive a connection loss.
        let mut status = connection.watch_status();
        let status_connection = Arc::clone(&connection);
        let status_reconciler = Arc::clone(&reconciler);
        tasks.push(tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                match current {
                    ConnectionStatus::Connected => {
                        for conversation_id in status_reconciler.open_views() {
                            debug!(conversation = %conversation_id, "rejoining after reconnect");
                            status_connection
                                .emit(ClientAction::Join { conversation_id })
                                .await;
                        }
                    }
                    ConnectionStatus::Reconnecting { .. }
                    | ConnectionStatus::ReconnectFailed
                    | ConnectionStatus::Disconnected
                    | ConnectionStatus::Error => {
                        status_reconciler.typing().clear();
                    }
                    ConnectionStatus::Connecting => {}
                }
            }
        }));

        let client = Self {
            api: Arc::new(api),
            connection,
            reconciler,
            profile,
            config,
            epochs: Mutex::new(HashMap::new()),
            tasks: Mutex::new(tasks),
        };
        (client, notify_rx)
    }

    /// Starts the live connection. With `None` the engine stays in REST
    /// mode and the status reports an error.
    pub fn connect(&self, credentials: Option<Credentials>) {
        self.connection.start(credentials);
    }

    /// Opens a conversation: subscribes to its live events and loads its
    /// history.
    ///
    /// A stale response from a previous open of the same conversation is
    /// discarded; only the latest open's fetch lands in the store.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the history fetch fails. The view stays
    /// open and live events still apply.
    pub async fn open_conversation(&self, counterpart: UserId) -> Result<(), ApiError> {
        self.reconciler.open_view(counterpart.clone());
        let epoch = self.bump_epoch(&counterpart);
        self.connection
            .emit(ClientAction::Join {
                conversation_id: counterpart.clone(),
            })
            .await;

        let page = self.api.fetch_history(&counterpart, None).await?;
        if self.current_epoch(&counterpart) != epoch {
            debug!(conversation = %counterpart, "discarding stale history fetch");
            return Ok(());
        }
        self.reconciler
            .apply_history(&counterpart, page.messages, page.unread_count);
        Ok(())
    }

    /// Loads an older history page into an already-open conversation,
    /// merging it with what is loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the fetch fails.
    pub async fn load_history_page(
        &self,
        counterpart: &UserId,
        page: u32,
    ) -> Result<(), ApiError> {
        let epoch = self.current_epoch(counterpart);
        let fetched = self.api.fetch_history(counterpart, Some(page)).await?;
        if self.current_epoch(counterpart) != epoch {
            debug!(conversation = %counterpart, page, "discarding stale page fetch");
            return Ok(());
        }
        self.reconciler.merge_history(counterpart, fetched.messages);
        Ok(())
    }

    /// Closes a conversation: unsubscribes and drops its view. Any
    /// in-flight history fetch for it is invalidated.
    pub async fn close_conversation(&self, counterpart: &UserId) {
        self.bump_epoch(counterpart);
        self.reconciler.close_view(counterpart);
        self.connection
            .emit(ClientAction::Leave {
                conversation_id: counterpart.clone(),
            })
            .await;
    }

    /// Sends a message with optimistic local echo.
    ///
    /// The echo appears in the open view immediately under a provisional
    /// id; on success it is replaced by the server's authoritative
    /// message, on failure it is rolled back.
    ///
    /// # Errors
    ///
    /// [`SendError::Validation`] for an empty or oversized message,
    /// [`SendError::Api`] when the backend fails the send.
    pub async fn send(
        &self,
        content: &str,
        receiver: &UserId,
        attachments: Vec<Attachment>,
    ) -> Result<Message, SendError> {
        let pending = Message {
            id: MessageId::provisional(),
            content: content.to_string(),
            sender: self.profile.clone(),
            receiver: receiver.clone(),
            attachments,
            read: false,
            created_at: Timestamp::now(),
            read_at: None,
        };
        pending.validate()?;

        let conversation = pending.conversation_key(self.reconciler.local());
        self.reconciler.record_outbound(&pending);

        match self
            .api
            .send_message(&pending.content, receiver, &pending.attachments)
            .await
        {
            Ok(authoritative) => {
                self.reconciler
                    .confirm_outbound(&authoritative, self.config.provisional_match_window);
                Ok(authoritative)
            }
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "send failed, rolling back echo");
                self.reconciler.discard_outbound(&conversation, &pending.id);
                Err(e.into())
            }
        }
    }

    /// Marks one message read locally and acknowledges it upstream.
    ///
    /// Idempotent: repeat calls for the same id neither move the counter
    /// nor hit the backend again. A failed acknowledgment can be retried
    /// with another call; the local flip is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the acknowledgment fails; local state is
    /// already updated at that point.
    pub async fn mark_read(
        &self,
        conversation: &UserId,
        message_id: &MessageId,
    ) -> Result<(), ApiError> {
        let flipped = self.reconciler.local_mark_read(conversation, message_id);
        if !flipped && !self.reconciler.needs_ack(message_id) {
            return Ok(());
        }
        self.api.mark_read(message_id).await?;
        self.reconciler.note_acked(message_id);
        Ok(())
    }

    /// Marks every unread inbound message in a conversation as read and
    /// acknowledges the conversation upstream. Returns how many messages
    /// were flipped.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the acknowledgment fails.
    pub async fn mark_conversation_read(&self, conversation: &UserId) -> Result<usize, ApiError> {
        let flipped = self.reconciler.mark_conversation_read(conversation);
        if flipped.is_empty() {
            return Ok(0);
        }
        self.api.mark_conversation_read(conversation).await?;
        for id in &flipped {
            self.reconciler.note_acked(id);
        }
        Ok(flipped.len())
    }

    /// Broadcasts a typing indicator. Dropped silently when not
    /// connected.
    pub async fn set_typing(&self, conversation: &UserId, is_typing: bool) {
        self.connection
            .emit(ClientAction::Typing {
                conversation_id: conversation.clone(),
                is_typing,
            })
            .await;
    }

    /// Refreshes the conversation list from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the fetch fails; the local list is left
    /// untouched.
    pub async fn refresh_conversations(
        &self,
        search: Option<&str>,
        status: Option<ConversationStatus>,
    ) -> Result<(), ApiError> {
        let conversations = self.api.fetch_conversations(search, status).await?;
        self.reconciler.apply_conversations(conversations);
        Ok(())
    }

    /// Archives a conversation on the backend and locally.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the backend call fails; local state is
    /// unchanged in that case.
    pub async fn archive_conversation(&self, conversation: &UserId) -> Result<(), ApiError> {
        self.api.archive_conversation(conversation).await?;
        self.reconciler
            .set_conversation_status(conversation, ConversationStatus::Archived);
        info!(conversation = %conversation, "conversation archived");
        Ok(())
    }

    /// Deletes a conversation on the backend and drops it locally.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the backend call fails; local state is
    /// unchanged in that case.
    pub async fn delete_conversation(&self, conversation: &UserId) -> Result<(), ApiError> {
        self.api.delete_conversation(conversation).await?;
        self.reconciler.remove_conversation(conversation);
        info!(conversation = %conversation, "conversation deleted");
        Ok(())
    }

    /// One polling pass for degraded (no live channel) operation.
    ///
    /// Refetches every open view and the conversation list through the
    /// same reconciliation paths the event-driven mode uses, so the two
    /// modes cannot diverge.
    ///
    /// # Errors
    ///
    /// Returns the first [`ApiError`] encountered.
    pub async fn poll_once(&self) -> Result<(), ApiError> {
        for conversation in self.reconciler.open_views() {
            let epoch = self.current_epoch(&conversation);
            let page = self.api.fetch_history(&conversation, None).await?;
            if self.current_epoch(&conversation) != epoch {
                continue;
            }
            self.reconciler
                .apply_history(&conversation, page.messages, page.unread_count);
        }
        self.refresh_conversations(None, None).await
    }

    /// Authoritative total unread count from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the fetch fails.
    pub async fn server_unread_count(&self) -> Result<u32, ApiError> {
        self.api.unread_count().await
    }

    /// Snapshot of one conversation's messages.
    #[must_use]
    pub fn messages(&self, conversation: &UserId) -> Vec<Message> {
        self.reconciler.messages(conversation)
    }

    /// Snapshot of the conversation list.
    #[must_use]
    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.reconciler.conversations()
    }

    /// Locally tracked total unread count.
    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.reconciler.total_unread()
    }

    /// Whether a counterpart is currently typing.
    #[must_use]
    pub fn is_typing(&self, user: &UserId) -> bool {
        self.reconciler.typing().is_typing(user)
    }

    /// Current connection status.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Watches connection status transitions.
    #[must_use]
    pub fn watch_status(&self) -> tokio::sync::watch::Receiver<ConnectionStatus> {
        self.connection.watch_status()
    }

    /// Tears down the connection and the background tasks.
    pub fn shutdown(&self) {
        self.connection.shutdown();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn bump_epoch(&self, conversation: &UserId) -> u64 {
        let mut epochs = self.epochs.lock();
        let epoch = epochs.entry(conversation.clone()).or_insert(0);
        *epoch += 1;
        *epoch
    }

    fn current_epoch(&self, conversation: &UserId) -> u64 {
        self.epochs
            .lock()
            .get(conversation)
            .copied()
            .unwrap_or(0)
    }
}

impl MessagingClient<crate::api::HttpApi, crate::connection::ws::WsConnector> {
    /// Creates a client wired to the real backend per the configuration:
    /// an HTTP collaborator for `api_base_url` and a WebSocket connector
    /// for `socket_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the HTTP client cannot be built.
    pub fn over_http(
        profile: Participant,
        admin: bool,
        token: impl Into<String>,
        config: SyncConfig,
    ) -> Result<(Self, tokio::sync::mpsc::Receiver<SyncNotification>), ApiError> {
        let token = token.into();
        let api = crate::api::HttpApi::new(
            config.api_base_url.clone(),
            token,
            admin,
            config.request_timeout,
        )?;
        let connector =
            crate::connection::ws::WsConnector::new(config.socket_url.clone(), config.connect_timeout);
        Ok(Self::new(api, connector, profile, admin, config))
    }
}

impl<A: MessageApi, C: Connector> Drop for MessagingClient<A, C> {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
