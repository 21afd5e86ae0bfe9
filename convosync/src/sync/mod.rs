//! Event reconciliation: folds the live event stream, history fetches,
//! and local actions into the stores.
//!
//! The [`Reconciler`] is the single writer for all conversation state.
//! Every mutation path — live events, REST responses, optimistic sends,
//! local mark-reads — goes through it, so the idempotency and counter
//! rules hold no matter which delivery path observed a change first.

mod typing;
mod unread;

pub use typing::TypingTracker;
pub use unread::UnreadLedger;

use std::collections::HashMap;
use std::time::Duration;

use convosync_proto::conversation::{ConversationStatus, ConversationSummary};
use convosync_proto::event::ServerEvent;
use convosync_proto::message::{LocalIdentity, Message, MessageId, Timestamp, UserId};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Something the embedding application should surface to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotification {
    /// An unread inbound message arrived. Never emitted for the local
    /// actor's own echoes.
    MessageArrived {
        /// Conversation the message belongs to.
        conversation: UserId,
        /// The message itself.
        message: Message,
    },
}

/// The reconciliation engine.
///
/// Holds the conversation list, one message view per open conversation,
/// the mark-read ledger, and the typing tracker. Methods are safe to
/// call from any task; interior locks are never held across awaits.
pub struct Reconciler {
    local: LocalIdentity,
    conversations: RwLock<crate::store::ConversationStore>,
    views: RwLock<HashMap<UserId, crate::store::MessageStore>>,
    ledger: Mutex<UnreadLedger>,
    delivered: Mutex<UnreadLedger>,
    acked: Mutex<UnreadLedger>,
    typing: TypingTracker,
    notify_tx: mpsc::Sender<SyncNotification>,
}

impl Reconciler {
    /// Creates a reconciler and the notification stream it feeds.
    #[must_use]
    pub fn new(
        local: LocalIdentity,
        typing_timeout: Duration,
        notify_buffer: usize,
    ) -> (Self, mpsc::Receiver<SyncNotification>) {
        let (notify_tx, notify_rx) = mpsc::channel(notify_buffer);
        let reconciler = Self {
            local,
            conversations: RwLock::new(crate::store::ConversationStore::new()),
            views: RwLock::new(HashMap::new()),
            ledger: Mutex::new(UnreadLedger::new()),
            delivered: Mutex::new(UnreadLedger::new()),
            acked: Mutex::new(UnreadLedger::new()),
            typing: TypingTracker::new(typing_timeout),
            notify_tx,
        };
        (reconciler, notify_rx)
    }

    /// The local actor's identity.
    #[must_use]
    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    /// Applies one live event to the stores.
    pub fn apply_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(msg) => self.apply_new_message(msg),
            ServerEvent::MessageRead { message_id } => self.apply_remote_read(&message_id),
            ServerEvent::UserTyping { user_id, is_typing } => {
                trace!(user = %user_id, is_typing, "typing indicator");
                self.typing.set(user_id, is_typing);
            }
            ServerEvent::Pong => {}
        }
    }

    fn apply_new_message(&self, msg: Message) {
        let key = msg.conversation_key(&self.local);
        let counterpart = msg.counterpart_profile(&self.local);
        let inbound = msg.is_inbound_to(&self.local);

        // The delivery ledger is what makes duplicates idempotent when no
        // open view is tracking the conversation.
        let first_delivery = self.delivered.lock().mark(&msg.id);
        let view_open = {
            let mut views = self.views.write();
            match views.get_mut(&key) {
                Some(view) => {
                    view.insert_if_absent(msg.clone());
                    true
                }
                None => false,
            }
        };
        if !first_delivery {
            debug!(message_id = %msg.id, "duplicate live delivery");
            return;
        }
        debug!(conversation = %key, message_id = %msg.id, inbound, "new message");

        {
            let mut conversations = self.conversations.write();
            conversations.upsert_and_promote(&key, counterpart, &msg);
            if inbound && !msg.read && !view_open {
                conversations.adjust_unread(&key, 1);
            }
        }

        if inbound && !msg.read {
            let notification = SyncNotification::MessageArrived {
                conversation: key,
                message: msg,
            };
            if self.notify_tx.try_send(notification).is_err() {
                warn!("notification channel full, dropping");
            }
        }
    }

    /// A remote read receipt flips the flag on our own sent message.
    /// Counters never move here; only local mark-reads decrement.
    fn apply_remote_read(&self, id: &MessageId) {
        let now = Timestamp::now();
        let mut views = self.views.write();
        for view in views.values_mut() {
            if view.mark_read(id, now) {
                trace!(message_id = %id, "remote read receipt applied");
                return;
            }
        }
    }

    /// Marks one inbound message read locally.
    ///
    /// Returns `true` only if this call actually flipped the flag. The
    /// unread counter decrements exactly once per message id no matter
    /// how many times this is invoked; a call that flips nothing (view
    /// not open, id unknown, already read) leaves the ledger untouched so
    /// a later attempt can still succeed.
    pub fn local_mark_read(&self, conversation: &UserId, id: &MessageId) -> bool {
        let flipped = self
            .views
            .write()
            .get_mut(conversation)
            .is_some_and(|view| view.mark_read(id, Timestamp::now()));
        if !flipped {
            return false;
        }
        // The ledger guards the counter against a second flip after a
        // history reload brought the message back unread.
        if self.ledger.lock().mark(id) {
            self.conversations.write().adjust_unread(conversation, -1);
        }
        true
    }

    /// Whether a locally-read message still awaits a backend
    /// acknowledgement. Used by the client to retry a failed ack without
    /// re-flipping anything.
    #[must_use]
    pub fn needs_ack(&self, id: &MessageId) -> bool {
        self.ledger.lock().contains(id) && !self.acked.lock().contains(id)
    }

    /// Records that the backend accepted a read acknowledgement.
    pub fn note_acked(&self, id: &MessageId) {
        self.acked.lock().mark(id);
    }

    /// Marks every unread inbound message in a conversation as read.
    ///
    /// Returns the ids that were actually flipped, for the caller to
    /// acknowledge upstream.
    pub fn mark_conversation_read(&self, conversation: &UserId) -> Vec<MessageId> {
        let pending: Vec<MessageId> = {
            let views = self.views.read();
            let Some(view) = views.get(conversation) else {
                return Vec::new();
            };
            view.messages()
                .iter()
                .filter(|m| !m.read && m.is_inbound_to(&self.local))
                .map(|m| m.id.clone())
                .collect()
        };

        let mut flipped = Vec::new();
        for id in pending {
            if self.local_mark_read(conversation, &id) {
                flipped.push(id);
            }
        }
        flipped
    }

    /// Records an optimistic local echo before the server has confirmed
    /// the send.
    pub fn record_outbound(&self, msg: &Message) {
        let key = msg.conversation_key(&self.local);
        if let Some(view) = self.views.write().get_mut(&key) {
            view.insert_if_absent(msg.clone());
        }
        self.conversations
            .write()
            .upsert_and_promote(&key, msg.counterpart_profile(&self.local), msg);
    }

    /// Replaces an optimistic echo with the server's authoritative
    /// message, or inserts it if no echo matches.
    pub fn confirm_outbound(&self, authoritative: &Message, match_window: Duration) {
        let key = authoritative.conversation_key(&self.local);
        let window_ms = u64::try_from(match_window.as_millis()).unwrap_or(u64::MAX);
        self.delivered.lock().mark(&authoritative.id);
        if let Some(view) = self.views.write().get_mut(&key)
            && !view.resolve_provisional(authoritative, window_ms)
        {
            view.insert_if_absent(authoritative.clone());
        }
        self.conversations.write().upsert_and_promote(
            &key,
            authoritative.counterpart_profile(&self.local),
            authoritative,
        );
    }

    /// Removes a failed optimistic echo.
    pub fn discard_outbound(&self, conversation: &UserId, provisional_id: &MessageId) {
        if let Some(view) = self.views.write().get_mut(conversation) {
            view.remove(provisional_id);
        }
    }

    /// Loads an authoritative history page into a conversation view.
    ///
    /// A server-supplied unread count, when present, is the only thing
    /// allowed to overwrite the counter.
    pub fn apply_history(
        &self,
        conversation: &UserId,
        messages: Vec<Message>,
        unread: Option<u32>,
    ) {
        {
            let mut delivered = self.delivered.lock();
            for msg in &messages {
                delivered.mark(&msg.id);
            }
        }
        if let Some(view) = self.views.write().get_mut(conversation) {
            view.replace(messages);
        }
        if let Some(count) = unread {
            self.conversations.write().set_unread(conversation, count);
        }
    }

    /// Merges an additional history page into an open view without
    /// discarding what is already loaded.
    pub fn merge_history(&self, conversation: &UserId, messages: Vec<Message>) {
        {
            let mut delivered = self.delivered.lock();
            for msg in &messages {
                delivered.mark(&msg.id);
            }
        }
        if let Some(view) = self.views.write().get_mut(conversation) {
            for msg in messages {
                view.insert_if_absent(msg);
            }
        }
    }

    /// Replaces the conversation list with an authoritative listing.
    pub fn apply_conversations(&self, summaries: Vec<ConversationSummary>) {
        self.conversations.write().replace_all(summaries);
    }

    /// Updates a conversation's lifecycle status.
    pub fn set_conversation_status(&self, conversation: &UserId, status: ConversationStatus) {
        self.conversations.write().set_status(conversation, status);
    }

    /// Drops a conversation and its view entirely.
    pub fn remove_conversation(&self, conversation: &UserId) {
        self.conversations.write().remove(conversation);
        self.views.write().remove(conversation);
    }

    /// Starts tracking live messages for a conversation.
    pub fn open_view(&self, conversation: UserId) {
        self.views.write().entry(conversation).or_default();
    }

    /// Stops tracking a conversation and drops its messages.
    pub fn close_view(&self, conversation: &UserId) {
        self.views.write().remove(conversation);
    }

    /// The conversations with an open message view.
    #[must_use]
    pub fn open_views(&self) -> Vec<UserId> {
        self.views.read().keys().cloned().collect()
    }

    /// Snapshot of one conversation's messages, ascending by creation
    /// time. Empty if the view is not open.
    #[must_use]
    pub fn messages(&self, conversation: &UserId) -> Vec<Message> {
        self.views
            .read()
            .get(conversation)
            .map(|v| v.messages().to_vec())
            .unwrap_or_default()
    }

    /// Snapshot of the conversation list, most recently active first.
    #[must_use]
    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.conversations.read().snapshot()
    }

    /// Snapshot of one conversation summary.
    #[must_use]
    pub fn conversation(&self, key: &UserId) -> Option<ConversationSummary> {
        self.conversations.read().get(key).cloned()
    }

    /// Sum of unread counters across all conversations.
    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.conversations.read().total_unread()
    }

    /// The typing tracker, for indicator queries and connection-loss
    /// resets.
    #[must_use]
    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }
}
