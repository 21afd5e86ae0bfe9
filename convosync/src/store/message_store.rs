//! Ordered per-conversation message storage.

use std::collections::HashSet;

use convosync_proto::message::{Message, MessageId, Timestamp};
use tracing::debug;

/// Outcome of [`MessageStore::insert_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// The message was new and has been appended.
    Inserted,
    /// A message with the same id was already present; its read state was
    /// merged.
    Duplicate,
}

/// The ordered message list for one open conversation.
///
/// Messages are kept ascending by `created_at` (ties broken by id so the
/// order is deterministic). Inserting an id twice is a no-op beyond a
/// monotonic merge of the read flag, regardless of how many delivery
/// paths observed the message.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    known_ids: HashSet<MessageId>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entire contents with an authoritative history page.
    ///
    /// Input order is not trusted; the result is sorted and deduplicated
    /// by id (first occurrence wins).
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        self.known_ids.clear();
        for msg in messages {
            if self.known_ids.insert(msg.id.clone()) {
                self.messages.push(msg);
            }
        }
        self.sort();
    }

    /// Inserts a message unless its id is already known.
    ///
    /// On a duplicate, read state is merged monotonically: a `read` flag
    /// already set is never cleared, and `read_at` is filled if missing.
    pub fn insert_if_absent(&mut self, msg: Message) -> Insert {
        if self.known_ids.contains(&msg.id) {
            if let Some(existing) = self.messages.iter_mut().find(|m| m.id == msg.id) {
                if msg.read && !existing.read {
                    existing.read = true;
                }
                if existing.read_at.is_none() {
                    existing.read_at = msg.read_at;
                }
            }
            debug!(message_id = %msg.id, "dropped duplicate message");
            return Insert::Duplicate;
        }

        let out_of_order = self
            .messages
            .last()
            .is_some_and(|last| last.created_at > msg.created_at);
        self.known_ids.insert(msg.id.clone());
        self.messages.push(msg);
        if out_of_order {
            self.sort();
        }
        Insert::Inserted
    }

    /// Marks a message as read. Returns `false` if the id is unknown or
    /// the flag was already set — the flip is monotonic and happens once.
    pub fn mark_read(&mut self, id: &MessageId, at: Timestamp) -> bool {
        let Some(msg) = self.messages.iter_mut().find(|m| &m.id == id) else {
            return false;
        };
        if msg.read {
            return false;
        }
        msg.read = true;
        msg.read_at = Some(at);
        true
    }

    /// Replaces the best-matching provisional entry with the
    /// authoritative message returned by the server.
    ///
    /// A provisional entry matches when sender id and trimmed content are
    /// equal and the creation times differ by at most `window_ms`. The
    /// earliest such entry is replaced in place — or dropped outright
    /// when the authoritative id is already present because a live push
    /// won the race against the send response. Returns `false` when no
    /// provisional entry matches (the caller then inserts normally).
    pub fn resolve_provisional(&mut self, authoritative: &Message, window_ms: u64) -> bool {
        let slot = self.messages.iter().position(|m| {
            m.id.is_provisional()
                && m.sender.id == authoritative.sender.id
                && m.content.trim() == authoritative.content.trim()
                && m.created_at.abs_diff(authoritative.created_at) <= window_ms
        });
        let Some(idx) = slot else {
            return false;
        };

        let provisional_id = self.messages[idx].id.clone();
        self.known_ids.remove(&provisional_id);
        if self.known_ids.contains(&authoritative.id) {
            self.messages.remove(idx);
        } else {
            self.known_ids.insert(authoritative.id.clone());
            self.messages[idx] = authoritative.clone();
        }
        debug!(
            provisional = %provisional_id,
            confirmed = %authoritative.id,
            "resolved provisional message"
        );
        self.sort();
        true
    }

    /// Removes a message by id. Returns `false` if the id is unknown.
    pub fn remove(&mut self, id: &MessageId) -> bool {
        if !self.known_ids.remove(id) {
            return false;
        }
        self.messages.retain(|m| &m.id != id);
        true
    }

    /// Whether a message with this id is present.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.known_ids.contains(id)
    }

    /// The messages in ascending `created_at` order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn sort(&mut self) {
        self.messages
            .sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.as_str().cmp(b.id.as_str()))
            });
    }
}
